//! Batch Cache with Byte-Budgeted LRU Eviction
//!
//! Bounded in-memory store of recently appended/read batches, keyed by base
//! offset. The hot read path for a tailing consumer is served entirely from
//! here without touching the segment file.
//!
//! ## Read Contract
//!
//! `read(start, ...)` walks the contiguous cached run that covers `start`:
//!
//! ```text
//! cached:  [0..9] [10..19] [20..29]          [50..59]
//!
//! read(12)        -> batches [10..19] [20..29], next_batch = 30
//! read(30)        -> miss (gap), next_batch = 30
//! read(55)        -> batches [50..59], next_batch = 60
//! ```
//!
//! A complete miss returns an empty result with `next_batch = start`, telling
//! the caller to fall back to disk for exactly that offset. The cache is not
//! required to agree with the on-disk index - a miss is always safe.
//!
//! ## Eviction
//!
//! Entries are tracked by an LRU list and a byte budget. `put` evicts from
//! the cold end until the new entry fits. Eviction only ever costs a reader a
//! cache miss, never correctness.

use std::collections::BTreeMap;

use lru::LruCache;
use tidelog_core::{BatchType, RecordBatch};
use tracing::warn;

/// Result of a cache read: the batches served and the offset to resume from
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub batches: Vec<RecordBatch>,
    pub next_batch: u64,
}

/// Bounded cache of record batches keyed by base offset
pub struct BatchCacheIndex {
    /// Byte budget over the encoded size of cached batches
    max_bytes: usize,

    /// Encoded bytes currently cached
    current_bytes: usize,

    /// Batches in offset order, for range scans
    entries: BTreeMap<u64, RecordBatch>,

    /// Recency tracking: base offset -> encoded size
    lru: LruCache<u64, usize>,
}

impl BatchCacheIndex {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            current_bytes: 0,
            entries: BTreeMap::new(),
            lru: LruCache::unbounded(),
        }
    }

    /// Insert or overwrite the entry for the batch's base offset, evicting
    /// LRU entries as needed to stay within the byte budget.
    pub fn put(&mut self, batch: RecordBatch) {
        let size = batch.encoded_len();
        let base = batch.base_offset;

        if let Some(old) = self.entries.insert(base, batch) {
            self.current_bytes -= old.encoded_len();
        }
        self.lru.put(base, size);
        self.current_bytes += size;

        while self.current_bytes > self.max_bytes {
            match self.lru.pop_lru() {
                Some((evicted, evicted_size)) => {
                    if self.entries.remove(&evicted).is_some() {
                        self.current_bytes -= evicted_size;
                    }
                }
                None => {
                    warn!(
                        needed = self.current_bytes,
                        max_bytes = self.max_bytes,
                        "batch larger than cache budget, not retained"
                    );
                    break;
                }
            }
        }
    }

    /// Read the contiguous cached run starting at `start`.
    ///
    /// Batches are accumulated in ascending offset order while:
    /// - the run stays contiguous (a gap ends the read),
    /// - the batch's base offset does not exceed `max_offset`,
    /// - the accumulated bytes stay under `max_bytes` (the batch that crosses
    ///   the budget is included, then the read stops).
    ///
    /// `type_filter` skips batches of other types; `min_first_timestamp`
    /// skips batches that end before the floor. Skipped batches still advance
    /// `next_batch`.
    pub fn read(
        &mut self,
        start: u64,
        max_offset: u64,
        type_filter: Option<BatchType>,
        min_first_timestamp: Option<u64>,
        max_bytes: usize,
    ) -> ReadResult {
        let mut batches = Vec::new();
        let mut next_batch = start;

        // Locate the cached batch containing `start`, if any
        let first_key = match self
            .entries
            .range(..=start)
            .next_back()
            .filter(|(_, b)| b.last_offset() >= start)
        {
            Some((k, _)) => *k,
            None => return ReadResult { batches, next_batch },
        };

        let mut expected = first_key;
        let mut acc_bytes = 0usize;

        for (key, batch) in self.entries.range(first_key..) {
            if *key != expected || batch.base_offset > max_offset {
                break;
            }
            expected = batch.last_offset() + 1;
            next_batch = expected;
            self.lru.get(key);

            if let Some(wanted) = type_filter {
                if batch.batch_type != wanted {
                    continue;
                }
            }
            if let Some(floor) = min_first_timestamp {
                if batch.max_timestamp < floor {
                    continue;
                }
            }

            acc_bytes += batch.encoded_len();
            batches.push(batch.clone());
            if acc_bytes >= max_bytes {
                break;
            }
        }

        ReadResult { batches, next_batch }
    }

    /// Drop every batch containing an offset at or beyond `from_offset`.
    /// Called by the segment on log truncation.
    pub fn truncate(&mut self, from_offset: u64) {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, b)| b.last_offset() >= from_offset)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            if let Some(batch) = self.entries.remove(&key) {
                self.current_bytes -= batch.encoded_len();
            }
            self.lru.pop(&key);
        }
    }

    /// Release all cached batches.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.current_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }
}
