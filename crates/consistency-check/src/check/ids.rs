use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out check ids, each exactly once.
///
/// Seed it above the largest id visible in every participating store so that
/// ids abandoned by an earlier scan are never reused.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl IdAllocator {
    /// Start allocating at `first`.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first.max(1)),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Raise the floor so future ids are above `seen`.
    pub fn observe(&self, seen: i64) {
        self.next.fetch_max(seen.saturating_add(1), Ordering::SeqCst);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
