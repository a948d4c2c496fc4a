//! SCTE-35 marker id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing marker ids.
///
/// One allocator is shared by every event the scheduler creates. Ids are not
/// persisted; a restarted process starts again from its configured base.
#[derive(Debug)]
pub struct MarkerAllocator {
    next: AtomicU64,
}

impl MarkerAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Id the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for MarkerAllocator {
    fn default() -> Self {
        Self::new()
    }
}
