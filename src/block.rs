use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

const BLOCK_MODE: u32 = 0o644;

/// Smallest well-formed gzip stream: 10 byte header, 2 byte empty deflate
/// block, 4 byte CRC32, 4 byte ISIZE.
const MIN_GZIP_LEN: u64 = 20;

/// Writes records as a gzip-compressed, newline-delimited block.
pub fn write(path: &Path, records: &[String], level: u32) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .mode(BLOCK_MODE)
        .open(path)?;

    let mut gz = GzEncoder::new(file, Compression::new(level.min(9)));
    for record in records {
        writeln!(gz, "{record}")?;
    }
    gz.finish()?;

    Ok(())
}

/// Reads a block's records (without trailing newlines) into `dst`.
pub fn read(path: &Path, dst: &mut Vec<String>) -> Result<()> {
    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(file));

    for line in reader.lines() {
        let line = line.map_err(|e| Error::CorruptBlock(format!("{}: {e}", path.display())))?;
        dst.push(line);
    }

    Ok(())
}

/// Uncompressed size of a block, read from the gzip ISIZE trailer without
/// decompressing. Only exact for blocks below 4 GiB, far above any block
/// the writer emits.
pub fn uncompressed_len(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;

    let len = file.metadata()?.len();
    if len < MIN_GZIP_LEN {
        return Err(Error::CorruptBlock(format!(
            "{}: truncated stream ({len} bytes)",
            path.display()
        )));
    }

    file.seek(SeekFrom::End(-4))?;
    let isize = file.read_u32::<LittleEndian>()?;
    Ok(u64::from(isize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempStore;

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempStore::new().unwrap();
        let path = dir.path().join("_k_0000");

        let records = vec![
            "k\tfirst".to_string(),
            "k\tsecond".to_string(),
            "k2\tthird".to_string(),
        ];
        write(&path, &records, 6).unwrap();

        let mut out = Vec::new();
        read(&path, &mut out).unwrap();
        assert_eq!(out, records);
    }

    #[test]
    fn test_uncompressed_len_matches_payload() {
        let dir = TempStore::new().unwrap();
        let path = dir.path().join("_k_0000");

        let records = vec!["k\tvalue".to_string(), "k\tother".to_string()];
        write(&path, &records, 1).unwrap();

        let expected: u64 = records.iter().map(|r| r.len() as u64 + 1).sum();
        assert_eq!(uncompressed_len(&path).unwrap(), expected);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = TempStore::new().unwrap();
        let path = dir.path().join("_k_0000");
        std::fs::write(&path, b"this is not a gzip stream at all").unwrap();

        let mut out = Vec::new();
        assert!(matches!(read(&path, &mut out), Err(Error::CorruptBlock(_))));
    }

    #[test]
    fn test_uncompressed_len_rejects_truncated() {
        let dir = TempStore::new().unwrap();
        let path = dir.path().join("_k_0000");
        std::fs::write(&path, b"short").unwrap();

        assert!(matches!(
            uncompressed_len(&path),
            Err(Error::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = TempStore::new().unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            read(&dir.path().join("_k_0000"), &mut out),
            Err(Error::Io(_))
        ));
    }
}
