//! Process-wide abort fan-out.
//!
//! Pipelines cancel their own token when they reach the end of their range,
//! which is not an error. An operator abort therefore cannot be modelled as
//! a single shared token: it is a flag plus every token registered so far.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Registry of cancellation handles that an abort must reach.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    aborted: AtomicBool,
    handles: Mutex<Vec<CancellationToken>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token`. A token registered after an abort is canceled
    /// immediately.
    pub fn register(&self, token: CancellationToken) {
        let mut handles = self.lock();
        handles.retain(|handle| !handle.is_cancelled());
        if self.is_aborted() {
            token.cancel();
        }
        handles.push(token);
    }

    /// Creates, registers and returns a new top-level token.
    #[must_use]
    pub fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.register(token.clone());
        token
    }

    /// Raises the abort flag and cancels every registered token.
    pub fn abort_all(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let handles = self.lock();
        warn!(handles = handles.len(), "Abort requested, canceling all tasks");
        for handle in handles.iter() {
            handle.cancel();
        }
    }

    /// Whether an abort was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CancellationToken>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
