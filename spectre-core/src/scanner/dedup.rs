//! Suppression of events already emitted during this run.

use alloy_primitives::B256;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Remembers every `(transaction hash, log index)` it has seen.
///
/// Shared by the live and backfill routines, whose windows meet at the scan
/// start block. Entries are kept for the lifetime of the deduper.
#[derive(Debug, Default)]
pub struct EventDeduper {
    seen: Mutex<HashSet<(B256, u64)>>,
}

impl EventDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the log and report whether this is the first time it was seen.
    pub fn first_seen(&self, tx_hash: B256, log_index: u64) -> bool {
        self.seen.lock().insert((tx_hash, log_index))
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
