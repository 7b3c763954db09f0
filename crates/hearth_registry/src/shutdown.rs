//! Shutdown coordination for graceful registry shutdown.
//!
//! Shared flags that let the registry stop accepting mutations while the
//! write-behind queues drain, and signal background tasks (flusher, idle
//! sweeper, stats worker) to wind down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// Set once shutdown begins - no new mutations are accepted after this
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once the final drain finished (or timed out) and cleanup may run
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    /// Creates a new shutdown state with both flags set to false.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if shutdown has been initiated - no new mutations should
    /// be accepted.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Returns true if the final drain has finished and cleanup can begin.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown - sets the flag that rejects new mutations.
    pub fn initiate_shutdown(&self) {
        self.shutdown_initiated.store(true, Ordering::Release);
        info!("🛑 Shutdown initiated - no new home mutations will be accepted");
    }

    /// Marks shutdown as complete - the final drain has run.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Registry drain finished - ready for final cleanup");
    }
}
