use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts cycles that currently keep the host awake.
#[derive(Debug, Clone, Default)]
pub struct WakeLocks {
    held: Arc<AtomicU64>,
}

impl WakeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> WakeLock {
        WakeLock::new(self.held.clone())
    }

    pub fn held(&self) -> u64 {
        self.held.load(Ordering::SeqCst)
    }
}

// Held until this WakeLock is dropped
pub struct WakeLock {
    counter: Arc<AtomicU64>,
}

impl WakeLock {
    fn new(counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);

        WakeLock { counter }
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
