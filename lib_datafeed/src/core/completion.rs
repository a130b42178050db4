//! Single-resolution guard for snapshot acquisition.
//!
//! Four paths race to finish a snapshot (end token, row cap, transport
//! failure, timeout). Each one must call [`CompletionGuard::try_complete`]
//! and only the caller that gets `true` may produce the outcome.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct CompletionGuard {
    done: AtomicBool,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the right to finalize. Returns `true` exactly once.
    pub fn try_complete(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}
