//! Cooperative cancellation handle shared across the kernel.
//!
//! Identical in shape to the teacher's `execute::context::AbortHandle`
//! (`Arc<AtomicBool>`, cloned across threads, any clone can flip it): here
//! it backs both `mo.stop`-independent SIGINT delivery (spec.md §4.3,
//! §5 "Interrupt") and the coroutine-cancellation path (`CancelledError`
//! translated back into `Interrupt`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn reset_clears_the_flag() {
        let handle = AbortHandle::new();
        handle.abort();
        handle.reset();
        assert!(!handle.is_aborted());
    }
}
