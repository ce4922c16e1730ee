//! Cooperative cancellation shared between the caller and worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag that, once raised, asks every worker to stop at the next chunk
/// boundary. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
