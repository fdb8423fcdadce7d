use std::sync::atomic::{AtomicU64, Ordering};

/// Global count of cache reclaim passes. Not attributed to any group.
#[derive(Default)]
pub struct ReclaimCounter {
    count: AtomicU64,
}

impl ReclaimCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn on_reclaim(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
