//! Cooperative shutdown primitive shared by every pipeline stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set-once stop flag.
///
/// Every stage receives a clone at construction and checks it at the top of its
/// loop and while waiting on a channel. Triggering is idempotent.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns true only for the call that flipped the flag.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.is_triggered()
    }
}
