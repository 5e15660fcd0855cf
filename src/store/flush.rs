use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::cache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::section;

use super::rebuild;

/// One-flush-at-a-time protocol: `Idle -> Flushing -> Idle`, with a sticky
/// `Poisoned` state entered when a background flush fails.
pub(crate) enum FlushState {
    Idle,
    Flushing(JoinHandle<Result<()>>),
    Poisoned,
}

impl FlushState {
    /// Non-blocking look at the in-flight flush. A flush that already landed
    /// with a failure poisons the state and surfaces its error here; an
    /// unfinished flush passes. Poison is sticky under polling.
    pub(crate) async fn poll(&mut self) -> Result<()> {
        match std::mem::replace(self, FlushState::Idle) {
            FlushState::Idle => Ok(()),
            FlushState::Poisoned => {
                *self = FlushState::Poisoned;
                Err(Error::FlushFailed)
            }
            FlushState::Flushing(handle) => {
                if !handle.is_finished() {
                    *self = FlushState::Flushing(handle);
                    return Ok(());
                }
                match join(handle).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        *self = FlushState::Poisoned;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Waits for any in-flight flush to land and reports its result. A
    /// failure is reported exactly once: afterwards the state is back to
    /// `Idle` and a fresh flush may be attempted.
    pub(crate) async fn wait(&mut self) -> Result<()> {
        match std::mem::replace(self, FlushState::Idle) {
            FlushState::Idle => Ok(()),
            FlushState::Poisoned => Err(Error::FlushFailed),
            FlushState::Flushing(handle) => join(handle).await,
        }
    }
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    }
}

/// Background body of one flush: dispatches every non-empty section to a
/// worker, at most `max_workers` running at once. The aggregate result is
/// the conjunction of all section results.
pub(crate) async fn flush_accum(
    config: Arc<Config>,
    buckets: HashMap<u16, Vec<String>>,
) -> Result<()> {
    if let Err(e) = fs::create_dir_all(config.store_root()) {
        tracing::error!(error = %e, "failed to create store root");
        return Err(e.into());
    }

    let gate = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let mut workers = Vec::with_capacity(buckets.len());
    for (sect, records) in buckets {
        let config = config.clone();
        let gate = gate.clone();
        workers.push(tokio::spawn(async move {
            let _permit = gate
                .acquire_owned()
                .await
                .map_err(|e| Error::Io(e.to_string()))?;
            flush_section(&config, sect, &records)
        }));
    }

    let mut result = Ok(());
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => result = Err(e),
            Err(e) => result = Err(e.into()),
        }
    }

    match &result {
        Ok(()) => tracing::info!("finished flushing"),
        Err(e) => tracing::error!(error = %e, "flushing failed"),
    }
    result
}

/// Flushes one section's records: appends to its cache while the cache stays
/// under its ceiling, otherwise rebuilds the section index.
fn flush_section(config: &Config, sect: u16, records: &[String]) -> Result<()> {
    tracing::debug!("started to flush section {sect:04x}");

    let cpath = section::cache_path(config, sect)?;
    let cache_size = match fs::metadata(&cpath) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => 0,
        Err(e) => {
            tracing::error!(error = %e, "failed to stat cache for section {sect:04x}");
            return Err(e.into());
        }
    };
    let add_size: u64 = records.iter().map(|r| r.len() as u64 + 1).sum();

    if cache_size + add_size > (config.max_cache_size_kib * 1024) as u64 {
        rebuild::rebuild_section(config, sect, &cpath, records)
    } else {
        cache::append(&cpath, records).map_err(|e| {
            tracing::error!(error = %e, "failed to append cache for section {sect:04x}");
            e
        })
    }
}
