use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::block;
use crate::cache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::keys;
use crate::section;

/// Streams every value stored under `key` to `emit`.
///
/// Index block files sort by name, and names start with the block's first
/// key, so the walk only has to decompress the block preceding the first
/// name at or past the target (the target's records may start inside it)
/// plus any further blocks whose name equals the target. The cache is
/// scanned linearly afterwards.
pub(crate) fn find_values(config: &Config, key: &str, emit: &mut dyn FnMut(&str)) -> Result<()> {
    let escaped = keys::escape(keys::strip(key, "\t\n"));
    let sect = keys::section_hash(&escaped);
    let spath = section::section_path(config, sect);

    let mut prev: Option<PathBuf> = None;
    let mut more = false;
    for path in section::index_files(&spath)? {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let (file_key, _part) = keys::parse_index_file_name(name)?;

        if file_key.as_str() < escaped.as_str() {
            prev = Some(path);
            more = true;
            continue;
        }

        if let Some(block_path) = prev.take() {
            emit_block_matches(&block_path, &escaped, emit)?;
        }
        more = file_key == escaped;
        prev = Some(path);
        if !more {
            break;
        }
    }
    if more {
        if let Some(block_path) = prev {
            emit_block_matches(&block_path, &escaped, emit)?;
        }
    }

    let cpath = section::cache_path(config, sect)?;
    let mut records = Vec::new();
    cache::read(&cpath, &mut records)?;
    for record in &records {
        if keys::record_key(record) == escaped {
            emit(keys::record_value(record));
        }
    }

    Ok(())
}

fn emit_block_matches(path: &Path, escaped: &str, emit: &mut dyn FnMut(&str)) -> Result<()> {
    let mut records = Vec::new();
    block::read(path, &mut records)?;
    for record in &records {
        if keys::record_key(record) == escaped {
            emit(keys::record_value(record));
        }
    }
    Ok(())
}

/// Streams every distinct key in the store to `emit`, section by section.
/// Singular keys come straight from their file names; everything else is
/// read out of block contents and the cache. Keys are emitted in raw
/// (unescaped) form, each exactly once.
pub(crate) fn find_keys(
    config: &Config,
    interrupt: &Interrupt,
    emit: &mut dyn FnMut(&str),
) -> Result<()> {
    for sect in 0..=u16::MAX {
        if interrupt.is_triggered() {
            return Err(Error::Interrupted);
        }

        let spath = section::section_path(config, sect);
        let mut records = Vec::new();
        let singulars = section::read_index(config, &spath, &mut records)?;
        cache::read(&section::cache_path(config, sect)?, &mut records)?;

        if singulars.is_empty() && records.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        for escaped in singulars.keys() {
            seen.insert(keys::unescape(escaped)?);
        }
        for record in &records {
            seen.insert(keys::unescape(keys::record_key(record))?);
        }
        for key in &seen {
            emit(key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempStore;
    use std::fs;

    /// Lays out the target key's section with a fixed set of blocks so the
    /// file-name walk itself is under test, not the hashing.
    fn populate_section_for(config: &Config, target: &str) {
        let sect = keys::section_hash(&keys::escape(target));
        let spath = section::section_path(config, sect);
        fs::create_dir_all(&spath).unwrap();

        block::write(
            &spath.join("_aa_0000"),
            &["aa\t1".to_string(), "ab\t2".to_string()],
            6,
        )
        .unwrap();
        block::write(&spath.join("_b_0000"), &["b\t3".to_string()], 6).unwrap();
    }

    fn values_for(config: &Config, target: &str) -> Vec<String> {
        let mut values = Vec::new();
        find_values(config, target, &mut |v| values.push(v.to_string())).unwrap();
        values
    }

    #[test]
    fn test_walk_finds_key_starting_a_block() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        populate_section_for(&config, "aa");
        assert_eq!(values_for(&config, "aa"), vec!["1"]);
    }

    #[test]
    fn test_walk_finds_key_inside_straddling_block() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        populate_section_for(&config, "ab");
        assert_eq!(values_for(&config, "ab"), vec!["2"]);
    }

    #[test]
    fn test_walk_drains_final_block() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        populate_section_for(&config, "b");
        assert_eq!(values_for(&config, "b"), vec!["3"]);
    }

    #[test]
    fn test_walk_misses_absent_key_between_blocks() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        populate_section_for(&config, "ac");
        assert!(values_for(&config, "ac").is_empty());
    }

    #[test]
    fn test_walk_collects_all_parts_of_a_key() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = keys::section_hash("k");
        let spath = section::section_path(&config, sect);
        fs::create_dir_all(&spath).unwrap();

        block::write(&spath.join("_k_0000"), &["k\tone".to_string()], 6).unwrap();
        block::write(&spath.join("_k_0001"), &["k\ttwo".to_string()], 6).unwrap();

        assert_eq!(values_for(&config, "k"), vec!["one", "two"]);
    }

    #[test]
    fn test_walk_rejects_malformed_names() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = keys::section_hash("k");
        let spath = section::section_path(&config, sect);
        fs::create_dir_all(&spath).unwrap();
        fs::write(spath.join("_bad"), b"junk").unwrap();

        let mut values = Vec::new();
        let result = find_values(&config, "k", &mut |v| values.push(v.to_string()));
        assert!(matches!(result, Err(Error::MalformedName(_))));
    }
}
