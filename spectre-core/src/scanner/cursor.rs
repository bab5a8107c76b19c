//! Scan progress and provider-safe chunking of block intervals.

use std::fmt;

/// An inclusive interval of block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered.
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Tracks the first block not yet processed and splits what lies from there
/// upward into chunks of at most `limit` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRangeCursor {
    /// `None` once `u64::MAX` itself has been processed.
    next: Option<u64>,
    confirmations: u64,
    limit: u64,
}

impl BlockRangeCursor {
    /// `last_processed` is an exclusive lower bound: scanning resumes at the
    /// block after it. A zero `limit` is treated as one.
    pub fn new(last_processed: u64, confirmations: u64, limit: u64) -> Self {
        Self {
            next: last_processed.checked_add(1),
            confirmations,
            limit: limit.max(1),
        }
    }

    /// A cursor with nothing processed yet whose first chunk begins at
    /// `first`, inclusive. Unlike [`new`](BlockRangeCursor::new) this can
    /// cover block 0.
    pub fn starting_at(first: u64, confirmations: u64, limit: u64) -> Self {
        Self {
            next: Some(first),
            confirmations,
            limit: limit.max(1),
        }
    }

    /// `None` while the cursor starts at block 0 and has not moved.
    pub fn last_processed(&self) -> Option<u64> {
        match self.next {
            Some(next) => next.checked_sub(1),
            None => Some(u64::MAX),
        }
    }

    /// Highest block considered settled for a chain at `head`.
    pub fn safe_height(&self, head: u64) -> u64 {
        head.saturating_sub(self.confirmations)
    }

    /// Chunks covering `[next, head - confirmations]`.
    pub fn ranges(&self, head: u64) -> Ranges {
        self.ranges_to(self.safe_height(head))
    }

    /// Chunks covering `[next, upper]`, ascending.
    pub fn ranges_to(&self, upper: u64) -> Ranges {
        Ranges {
            next: self.next,
            upper,
            limit: self.limit,
        }
    }

    /// Record `range` as processed.
    ///
    /// Only the range starting at the next unprocessed block moves the
    /// cursor, so progress never skips over an unprocessed chunk. Returns
    /// whether the cursor moved.
    pub fn advance(&mut self, range: BlockRange) -> bool {
        if Some(range.from) != self.next || range.to < range.from {
            return false;
        }
        self.next = range.to.checked_add(1);
        true
    }
}

/// Iterator over the chunks of a block interval.
#[derive(Debug, Clone)]
pub struct Ranges {
    next: Option<u64>,
    upper: u64,
    limit: u64,
}

impl Iterator for Ranges {
    type Item = BlockRange;

    fn next(&mut self) -> Option<BlockRange> {
        let from = self.next.filter(|from| *from <= self.upper)?;
        let to = from.saturating_add(self.limit - 1).min(self.upper);
        self.next = to.checked_add(1);
        Some(BlockRange { from, to })
    }
}
