use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod edge_case_tests;

/// Payload that counts how many times it has been dropped.
pub(crate) struct DropCounter {
    drops: Arc<AtomicUsize>,
    pub(crate) value: usize,
}

impl DropCounter {
    pub(crate) fn new(drops: &Arc<AtomicUsize>, value: usize) -> Self {
        Self {
            drops: Arc::clone(drops),
            value,
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}
