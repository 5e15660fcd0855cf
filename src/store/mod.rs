//! Append-only, disk-resident, sorted multi-map keyed by short strings.
//!
//! Records (`escaped_key \t value`) are staged in an in-memory accumulator,
//! sharded over 65,536 sections by a CRC-16 of the escaped key. Crossing the
//! accumulator ceiling sweeps it into a background flush: each non-empty
//! section either appends to its plain cache file, or, when the cache would
//! outgrow its ceiling, rebuilds the section index into sorted, gzipped
//! record blocks. Oversized single-key blocks are preserved across rebuilds
//! by hard link instead of being rewritten.
//!
//! At most one flush is in flight per store. A failed flush poisons the
//! store: subsequent writes fail fast until a waited flush reports the
//! failure and clears it. The public API is single-writer; callers serialize
//! access.

mod flush;
mod read;
mod rebuild;

use std::sync::Arc;

use crate::accum::Accumulator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::keys;

use flush::FlushState;

pub struct Store {
    config: Arc<Config>,
    interrupt: Interrupt,
    accum: Accumulator,
    flushed: FlushState,
}

impl Store {
    /// Opens a store over the configured root. No filesystem work happens
    /// until the first flush.
    pub fn new(config: Config, interrupt: Interrupt) -> Self {
        Self {
            config: Arc::new(config),
            interrupt,
            accum: Accumulator::new(),
            flushed: FlushState::Idle,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stages one key/value pair. The key is truncated at the first tab or
    /// newline, the value at the first newline. Crossing the accumulator
    /// ceiling starts a background flush of everything staged so far.
    pub async fn add_value(&mut self, key: &str, value: &str) -> Result<()> {
        if self.interrupt.is_triggered() {
            return Err(Error::Interrupted);
        }
        self.flushed.poll().await?;

        let key = keys::strip(key, "\t\n");
        let value = keys::strip(value, "\n");
        let escaped = keys::escape(key);
        let section = keys::section_hash(&escaped);
        let record = format!("{escaped}\t{value}");

        let max = self.config.max_accum_size_mib * 1024 * 1024;
        if self.accum.size() + record.len() + 1 > max {
            self.start_flush().await?;
        }

        self.accum.push(section, record);
        Ok(())
    }

    /// Sweeps the accumulator into a background flush. Any flush already in
    /// flight is waited for first and its failure propagated (in which case
    /// nothing new is started and staged records stay put). With `wait` the
    /// call also blocks until the new flush lands and returns its result.
    pub async fn flush(&mut self, wait: bool) -> Result<()> {
        self.start_flush().await?;
        if wait {
            self.flushed.wait().await?;
        }
        Ok(())
    }

    /// Calls `emit` once per value stored under `key`.
    pub fn find_values(&self, key: &str, mut emit: impl FnMut(&str)) -> Result<()> {
        read::find_values(&self.config, key, &mut emit)
    }

    /// Calls `emit` once per distinct key in the store.
    pub fn find_keys(&self, mut emit: impl FnMut(&str)) -> Result<()> {
        read::find_keys(&self.config, &self.interrupt, &mut emit)
    }

    async fn start_flush(&mut self) -> Result<()> {
        self.flushed.wait().await?;

        let records = self.accum.len();
        let bytes = self.accum.size();
        tracing::info!(records, bytes, "started flushing");

        let buckets = self.accum.take();
        let config = self.config.clone();
        self.flushed = FlushState::Flushing(tokio::spawn(flush::flush_accum(config, buckets)));
        Ok(())
    }
}
