//! Chunk planning and bisection.

use serde::{Deserialize, Serialize};

use crate::config::ChunkSize;

/// A contiguous run of rows (or keys) covered by one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// First row position or key.
    pub start: i64,
    /// Number of rows or keys.
    pub size: i64,
}

impl Chunk {
    pub fn new(start: i64, size: i64) -> Self {
        Self { start, size }
    }

    /// End of the chunk, exclusive.
    pub fn end(&self) -> i64 {
        self.start.saturating_add(self.size)
    }

    /// Bisect into `(start, ceil(size/2))` and `(start + ceil(size/2), floor(size/2))`.
    pub fn split(&self) -> (Chunk, Chunk) {
        let upper = self.size - self.size / 2;
        let lower = self.size / 2;
        (
            Chunk::new(self.start, upper),
            Chunk::new(self.start + upper, lower),
        )
    }
}

/// Smallest power of two that is `>= n` (1 for `n <= 1`).
pub fn next_power_of_two(n: i64) -> i64 {
    if n <= 1 {
        return 1;
    }
    (n as u64).next_power_of_two().min(1 << 62) as i64
}

/// Chunk size used for a range of `range_len` rows.
pub fn effective_chunk_size(range_len: i64, requested: ChunkSize) -> i64 {
    match requested {
        ChunkSize::Single => range_len.max(1),
        ChunkSize::Rows(n) => {
            let size = next_power_of_two(n.min(i64::MAX as u64) as i64);
            if range_len < size {
                next_power_of_two(range_len)
            } else {
                size
            }
        }
    }
}

/// Iterator over the top-level chunks of `[from, till)`.
///
/// The last chunk is clamped to `till`.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    next: i64,
    till: i64,
    size: i64,
}

impl ChunkPlan {
    pub fn new(from: i64, till: i64, requested: ChunkSize) -> Self {
        let len = till.saturating_sub(from).max(0);
        Self {
            next: from,
            till,
            size: effective_chunk_size(len, requested),
        }
    }

    /// Size of every chunk but possibly the last.
    pub fn chunk_size(&self) -> i64 {
        self.size
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.till {
            return None;
        }
        let size = self.size.min(self.till.saturating_sub(self.next));
        let chunk = Chunk::new(self.next, size);
        self.next = self.next.saturating_add(size);
        Some(chunk)
    }
}
