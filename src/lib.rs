//! bagdb: an append-only, disk-resident, sorted multi-map for write-heavy
//! ingestion of small keyed records and whole-key retrieval.

pub mod accum;
pub mod block;
pub mod cache;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod keys;
pub mod section;
pub mod store;
pub mod testutil;

pub use config::Config;
pub use error::{Error, Result};
pub use interrupt::Interrupt;
pub use store::Store;
