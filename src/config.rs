use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Configuration for the store.
///
/// Deserializes from the JSON configuration file the CLI loads. Field names
/// on disk keep their historical spelling (`StorePath`, `MaxAccumSizeMiB`,
/// ...); `MaxWorkers` is also accepted under its legacy name `MaxGoroutines`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding the section tree. Environment variables in the
    /// form `$VAR` or `${VAR}` are expanded.
    #[serde(rename = "StorePath")]
    pub store_path: String,

    /// RAM accumulator ceiling in MiB; crossing it triggers a flush.
    #[serde(rename = "MaxAccumSizeMiB")]
    pub max_accum_size_mib: usize,

    /// Per-section cache file ceiling in KiB; crossing it on a flush triggers
    /// an index rebuild.
    #[serde(rename = "MaxCacheSizeKiB")]
    pub max_cache_size_kib: usize,

    /// Target maximum uncompressed bytes per index block, in KiB.
    #[serde(rename = "MaxIndexBlockSizeKiB")]
    pub max_index_block_size_kib: usize,

    /// Uncompressed size in KiB above which a block is singular and preserved
    /// across rebuilds by hard link.
    #[serde(rename = "MinSingularSizeKiB")]
    pub min_singular_size_kib: usize,

    /// Gzip level used for block writes (0-9).
    #[serde(rename = "CompressionLevel")]
    pub compression_level: u32,

    /// Concurrency gate for flush workers.
    #[serde(rename = "MaxWorkers", alias = "MaxGoroutines")]
    pub max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: String::from("./bagdb"),
            max_accum_size_mib: 128,
            max_cache_size_kib: 1024,
            max_index_block_size_kib: 256,
            min_singular_size_kib: 512,
            compression_level: 6,
            max_workers: 8,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given store path.
    pub fn new(store_path: impl Into<String>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Default::default()
        }
    }

    /// Set the accumulator ceiling in MiB.
    pub fn max_accum_size_mib(mut self, mib: usize) -> Self {
        self.max_accum_size_mib = mib;
        self
    }

    /// Set the cache file ceiling in KiB.
    pub fn max_cache_size_kib(mut self, kib: usize) -> Self {
        self.max_cache_size_kib = kib;
        self
    }

    /// Set the index block size target in KiB.
    pub fn max_index_block_size_kib(mut self, kib: usize) -> Self {
        self.max_index_block_size_kib = kib;
        self
    }

    /// Set the singular block threshold in KiB.
    pub fn min_singular_size_kib(mut self, kib: usize) -> Self {
        self.min_singular_size_kib = kib;
        self
    }

    /// Set the gzip compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the flush worker gate width.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// The store root with environment variables expanded.
    pub fn store_root(&self) -> PathBuf {
        PathBuf::from(expand_env(&self.store_path))
    }
}

/// Expands `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        let (name, tail) = if let Some(stripped) = rest.strip_prefix('{') {
            match stripped.find('}') {
                Some(end) => (&stripped[..end], &stripped[end + 1..]),
                None => {
                    out.push('$');
                    out.push('{');
                    rest = stripped;
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        };

        if name.is_empty() {
            out.push('$');
        } else if let Ok(val) = env::var(name) {
            out.push_str(&val);
        }
        rest = tail;
    }

    out.push_str(rest);
    out
}
