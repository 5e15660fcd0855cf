use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::block;
use crate::config::Config;
use crate::error::Result;
use crate::keys;

/// Part numbers of singular blocks in a section, keyed by escaped key.
pub type Singulars = HashMap<String, Vec<u16>>;

/// Directory (or pre-compaction plain file) holding one section.
pub fn section_path(config: &Config, section: u16) -> PathBuf {
    config.store_root().join(format!("{section:04x}"))
}

/// Path records are cached at for a section. Before the first compaction the
/// section itself is a plain file and doubles as the cache; afterwards the
/// cache lives inside the section directory.
pub fn cache_path(config: &Config, section: u16) -> Result<PathBuf> {
    let spath = section_path(config, section);
    match fs::metadata(&spath) {
        Ok(meta) if meta.is_dir() => Ok(spath.join("cache")),
        Ok(_) => Ok(spath),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(spath),
        Err(e) => {
            tracing::error!(error = %e, "failed to obtain cache path for section {section:04x}");
            Err(e.into())
        }
    }
}

/// Index block files of a section in file-name sort order. An absent section
/// or one still in plain-file form lists as empty.
pub fn index_files(spath: &Path) -> Result<Vec<PathBuf>> {
    match fs::metadata(spath) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(Vec::new()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(spath)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('_') {
            names.push(name.to_string());
        }
    }
    names.sort();

    Ok(names.into_iter().map(|n| spath.join(n)).collect())
}

/// Loads a section's index: non-singular block contents are appended to
/// `dst`, singular blocks are only recorded by name. Singularity is judged
/// on the block's uncompressed size against the configured threshold.
pub fn read_index(config: &Config, spath: &Path, dst: &mut Vec<String>) -> Result<Singulars> {
    let mut singulars = Singulars::new();

    for path in index_files(spath)? {
        let size = block::uncompressed_len(&path)?;
        if size >= (config.min_singular_size_kib * 1024) as u64 {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let (key, part) = keys::parse_index_file_name(name)?;
            singulars.entry(key).or_default().push(part);
        } else {
            block::read(&path, dst)?;
        }
    }

    Ok(singulars)
}
