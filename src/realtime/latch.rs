//! Write-once resolution latch
//!
//! The first `try_set` stores its value and cancels the latch token; every
//! later attempt is a no-op. Racing arms select on `cancelled()` to stop as
//! soon as any arm has won.

use std::sync::Mutex;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug)]
pub struct ResolutionLatch<T> {
    slot: Mutex<Option<T>>,
    token: CancellationToken,
}

impl<T> Default for ResolutionLatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResolutionLatch<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    /// Stores `value` unless the latch is already set. Returns whether this
    /// call won.
    pub fn try_set(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if self.token.is_cancelled() {
            return false;
        }
        *slot = Some(value);
        self.token.cancel();
        true
    }

    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the latch is set.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Removes the latched value.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
