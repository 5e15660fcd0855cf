use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token threaded through the public API. The CLI sets it on
/// the first interrupt; the core observes it at safe points (top of
/// `add_value`, between sections in `find_keys`).
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    triggered: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}
