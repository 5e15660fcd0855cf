use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::block;
use crate::cache;
use crate::config::Config;
use crate::error::Result;
use crate::keys;
use crate::section::{self, Singulars};

const DIR_MODE: u32 = 0o777;

/// Rebuilds a section's index: existing non-singular blocks, the cache file
/// and the flush's fresh records are sorted by escaped key and re-emitted as
/// sized blocks in a staging directory, which then replaces the section
/// directory by rename. Singular blocks carry over untouched by hard link.
///
/// There is a non-atomic window between removing the old directory and the
/// rename; a crash inside it leaves the section's data reachable only through
/// the staging directory. Leftover staging directories are superseded by the
/// next rebuild of the section and never mistaken for section directories
/// (their names contain a dot).
pub(crate) fn rebuild_section(
    config: &Config,
    sect: u16,
    cache_path: &Path,
    fresh: &[String],
) -> Result<()> {
    tracing::info!("started to rebuild index for section {sect:04x}");

    let spath = section::section_path(config, sect);
    let mut records = fresh.to_vec();
    let singulars = section::read_index(config, &spath, &mut records).map_err(|e| {
        tracing::error!(error = %e, "failed to read index for section {sect:04x}");
        e
    })?;
    cache::read(cache_path, &mut records)?;

    records.sort_unstable_by(|a, b| keys::record_key(a).cmp(keys::record_key(b)));

    let tmp = stage_dir(&spath)?;
    link_singulars(&spath, &tmp, &singulars)?;
    write_blocks(config, &tmp, &records, &singulars)?;

    remove_section(&spath)?;
    fs::rename(&tmp, &spath)?;

    tracing::info!("finished rebuilding index for section {sect:04x}");
    Ok(())
}

/// Creates the sibling staging directory, superseding any leftover from a
/// crashed rebuild.
fn stage_dir(spath: &Path) -> Result<PathBuf> {
    let tmp = spath.with_extension("tmp");
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }
    fs::DirBuilder::new().mode(DIR_MODE).create(&tmp)?;
    Ok(tmp)
}

/// Hard-links every preserved singular block into the staging directory
/// under its original name.
fn link_singulars(spath: &Path, tmp: &Path, singulars: &Singulars) -> Result<()> {
    for (key, parts) in singulars {
        for &part in parts {
            let name = keys::index_file_name(key, part);
            fs::hard_link(spath.join(&name), tmp.join(&name))?;
        }
    }
    Ok(())
}

/// Greedy block packer over the sorted record list. A block keeps accepting
/// records while the next one fits under the size target, or while the next
/// record's key equals the block's starting key, so a run of one key is
/// never cut at the target and may form an oversized mono-key block.
fn write_blocks(
    config: &Config,
    dir: &Path,
    records: &[String],
    singulars: &Singulars,
) -> Result<()> {
    let max = config.max_index_block_size_kib * 1024;

    let mut prev = 0;
    let mut size = 0;
    for i in 0..records.len() {
        size += records[i].len();

        if let Some(next) = records.get(i + 1) {
            let fits = size + next.len() <= max;
            let same_key = keys::record_key(next) == keys::record_key(&records[prev]);
            if fits || same_key {
                continue;
            }
        }

        let first_key = keys::record_key(&records[prev]);
        let name = keys::index_file_name(first_key, next_part(singulars, first_key));
        block::write(&dir.join(name), &records[prev..=i], config.compression_level)?;

        prev = i + 1;
        size = 0;
    }

    Ok(())
}

/// First free part number for a key, past any preserved singular parts.
/// Derived from the highest part seen, not the count, so gaps in the
/// preserved sequence cannot cause a name collision.
fn next_part(singulars: &Singulars, key: &str) -> u16 {
    singulars
        .get(key)
        .and_then(|parts| parts.iter().max())
        .map(|&part| part + 1)
        .unwrap_or(0)
}

/// Removes the old section, whichever form it is in.
fn remove_section(spath: &Path) -> Result<()> {
    match fs::metadata(spath) {
        Ok(meta) if meta.is_dir() => Ok(fs::remove_dir_all(spath)?),
        Ok(_) => Ok(fs::remove_file(spath)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempStore;
    use std::os::unix::fs::MetadataExt;

    fn read_section_records(config: &Config, sect: u16) -> Vec<String> {
        let spath = section::section_path(config, sect);
        let mut records = Vec::new();
        for path in section::index_files(&spath).unwrap() {
            block::read(&path, &mut records).unwrap();
        }
        records
    }

    #[test]
    fn test_single_record_rebuild() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = keys::section_hash("x");
        let cpath = section::cache_path(&config, sect).unwrap();

        rebuild_section(&config, sect, &cpath, &["x\t1".to_string()]).unwrap();

        let spath = section::section_path(&config, sect);
        assert!(spath.is_dir());
        let names: Vec<_> = section::index_files(&spath)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["_x_0000"]);

        let mut records = Vec::new();
        block::read(&spath.join("_x_0000"), &mut records).unwrap();
        assert_eq!(records, vec!["x\t1"]);
    }

    #[test]
    fn test_multi_key_block_sorted_by_key() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = 0x1234;
        let cpath = section::cache_path(&config, sect).unwrap();

        rebuild_section(
            &config,
            sect,
            &cpath,
            &["ab\t1".to_string(), "aa\t2".to_string()],
        )
        .unwrap();

        let spath = section::section_path(&config, sect);
        let names: Vec<_> = section::index_files(&spath)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["_aa_0000"]);

        let mut records = Vec::new();
        block::read(&spath.join("_aa_0000"), &mut records).unwrap();
        assert_eq!(records, vec!["aa\t2", "ab\t1"]);
    }

    #[test]
    fn test_singular_preserved_by_hard_link() {
        let dir = TempStore::new().unwrap();
        let config = dir.config()
            .min_singular_size_kib(0)
            .max_index_block_size_kib(1);
        let sect = keys::section_hash("k");
        let cpath = section::cache_path(&config, sect).unwrap();

        let first: Vec<String> = (0..50).map(|i| format!("k\tv{i}")).collect();
        rebuild_section(&config, sect, &cpath, &first).unwrap();

        let spath = section::section_path(&config, sect);
        let inode = fs::metadata(spath.join("_k_0000")).unwrap().ino();

        // the section is a directory now, so the cache path moved inside it
        let cpath = section::cache_path(&config, sect).unwrap();
        rebuild_section(&config, sect, &cpath, &["k\tv50".to_string()]).unwrap();

        // the oversized mono-key block survived untouched, same inode
        assert_eq!(fs::metadata(spath.join("_k_0000")).unwrap().ino(), inode);

        let mut added = Vec::new();
        block::read(&spath.join("_k_0001"), &mut added).unwrap();
        assert_eq!(added, vec!["k\tv50"]);
    }

    #[test]
    fn test_rebuild_merges_cache_and_blocks() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = 0x00ab;
        let cpath = section::cache_path(&config, sect).unwrap();

        rebuild_section(&config, sect, &cpath, &["b\t1".to_string()]).unwrap();

        // once the section is a directory, the cache moves inside it
        let cpath = section::cache_path(&config, sect).unwrap();
        cache::append(&cpath, &["a\t2".to_string()]).unwrap();

        rebuild_section(&config, sect, &cpath, &["c\t3".to_string()]).unwrap();

        assert_eq!(
            read_section_records(&config, sect),
            vec!["a\t2", "b\t1", "c\t3"]
        );
        // the merged cache is gone from the rebuilt directory
        assert!(!section::section_path(&config, sect).join("cache").exists());
    }

    #[test]
    fn test_rebuild_from_plain_file_section() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = 0x0042;

        // pre-compaction form: the section path is itself the cache
        let spath = section::section_path(&config, sect);
        fs::write(&spath, "m\t1\n").unwrap();
        let cpath = section::cache_path(&config, sect).unwrap();
        assert_eq!(cpath, spath);

        rebuild_section(&config, sect, &cpath, &["m\t2".to_string()]).unwrap();

        assert!(spath.is_dir());
        let mut records = read_section_records(&config, sect);
        records.sort();
        assert_eq!(records, vec!["m\t1", "m\t2"]);
    }

    #[test]
    fn test_block_size_bound() {
        let dir = TempStore::new().unwrap();
        let config = dir.config()
            .max_index_block_size_kib(1)
            .min_singular_size_kib(1024);
        let sect = 0x0007;
        let cpath = section::cache_path(&config, sect).unwrap();

        let records: Vec<String> = (0..200)
            .map(|i| format!("key-{i:03}\t{}", "v".repeat(40)))
            .collect();
        let max_record = records.iter().map(String::len).max().unwrap() as u64;
        rebuild_section(&config, sect, &cpath, &records).unwrap();

        let spath = section::section_path(&config, sect);
        let files = section::index_files(&spath).unwrap();
        assert!(files.len() > 1);
        for path in &files {
            let size = block::uncompressed_len(path).unwrap();
            assert!(
                size <= 1024 + max_record + 1,
                "block {} is {size} bytes",
                path.display()
            );
        }

        // concatenation in file-name order stays sorted
        let mut all = Vec::new();
        for path in &files {
            block::read(path, &mut all).unwrap();
        }
        let mut sorted = all.clone();
        sorted.sort_by(|a, b| keys::record_key(a).cmp(keys::record_key(b)));
        assert_eq!(all, sorted);
    }

    #[test]
    fn test_stale_staging_dir_is_superseded() {
        let dir = TempStore::new().unwrap();
        let config = dir.config();
        let sect = 0x0009;
        let cpath = section::cache_path(&config, sect).unwrap();

        let tmp = section::section_path(&config, sect).with_extension("tmp");
        fs::create_dir_all(&tmp).unwrap();
        fs::write(tmp.join("_stale_0000"), b"leftover").unwrap();

        rebuild_section(&config, sect, &cpath, &["q\t1".to_string()]).unwrap();

        assert!(!tmp.exists());
        assert_eq!(read_section_records(&config, sect), vec!["q\t1"]);
    }
}
