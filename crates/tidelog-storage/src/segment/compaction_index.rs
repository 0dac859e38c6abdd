//! Compacted Topic Index
//!
//! Auxiliary per-segment map from compaction key to the physical offset of
//! the latest batch carrying that key. Only segments of key-compacted topics
//! carry one; the compaction pass uses it to decide which physical batches
//! have been superseded by a newer write for the same key.
//!
//! Latest-wins: indexing a key again simply overwrites its previous position.

use std::collections::HashMap;

use bytes::Bytes;

/// Map from record key to the physical offset of its newest batch
#[derive(Default)]
pub struct CompactedTopicIndex {
    keys: HashMap<Bytes, u64>,
}

impl CompactedTopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` was last written by the batch starting at `physical`.
    pub fn index(&mut self, key: Bytes, physical: u64) {
        self.keys.insert(key, physical);
    }

    /// Physical offset of the newest batch for `key`, if any.
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        self.keys.get(key).copied()
    }

    /// Drop entries at or beyond a truncation point.
    pub fn truncate(&mut self, physical: u64) {
        self.keys.retain(|_, pos| *pos < physical);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
