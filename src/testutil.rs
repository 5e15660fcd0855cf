use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Config;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Scratch filesystem root for tests. Each instance claims a unique
/// directory under the system temp dir and tears the whole tree down on
/// drop. [`TempStore::config`] hands out a store configuration rooted
/// inside it, the same way production code roots every section under
/// [`Config::store_root`].
pub struct TempStore {
    root: PathBuf,
}

impl TempStore {
    pub fn new() -> std::io::Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("bagdb-test-{}-{id}", std::process::id()));

        // a stale tree can only be left by an earlier killed run
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    /// A config whose store root lives inside the scratch tree. The root
    /// directory is created up front so tests can lay out sections by hand
    /// before the first flush would create it.
    pub fn config(&self) -> Config {
        let store = self.root.join("store");
        let _ = fs::create_dir_all(&store);
        Config::new(store.to_string_lossy().into_owned())
    }

    /// The scratch directory itself, for tests that arrange raw files
    /// outside any store root.
    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}
