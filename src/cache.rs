use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::Result;

const CACHE_MODE: u32 = 0o644;

/// Appends records to a per-section cache file, one per line, creating the
/// file if needed.
pub fn append(path: &Path, records: &[String]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(true)
        .mode(CACHE_MODE)
        .open(path)?;

    let mut out = BufWriter::new(file);
    for record in records {
        writeln!(out, "{record}")?;
    }
    out.flush()?;

    Ok(())
}

/// Reads a cache file's records into `dst`. A missing file reads as empty.
pub fn read(path: &Path, dst: &mut Vec<String>) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for line in BufReader::new(file).lines() {
        dst.push(line?);
    }

    Ok(())
}
