//! Partition Manifest
//!
//! The manifest is the catalogue mapping a partition's offset ranges to
//! remote object keys and segment metadata. The engine treats it as
//! read-only: remote segments are constructed from a *snapshot* of one entry
//! (`SegmentMeta` is cloned out, never borrowed), so a manifest refresh can
//! never invalidate a live remote segment.
//!
//! `delta_offset` is the count of control (non-data) batches in all segments
//! before this one; it translates between the two offset coordinate systems:
//!
//! ```text
//! data_offset = log_offset - delta_offset
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata for one remote segment, snapshotted out of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Object key within the bucket
    pub key: String,

    /// First log offset covered by the segment
    pub base_offset: u64,

    /// Last log offset covered by the segment
    pub max_offset: u64,

    /// Control batches in all prior segments
    pub delta_offset: u64,

    /// Term the segment was produced under
    pub term: u64,

    /// Object size in bytes
    pub size_bytes: u64,
}

/// Read-only catalogue of a partition's remote segments, keyed by base offset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    segments: BTreeMap<u64, SegmentMeta>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = SegmentMeta>) -> Self {
        Self {
            segments: segments
                .into_iter()
                .map(|meta| (meta.base_offset, meta))
                .collect(),
        }
    }

    /// Add an entry; the manifest's owner (the controller) builds it, the
    /// engine only ever reads.
    pub fn insert(&mut self, meta: SegmentMeta) {
        self.segments.insert(meta.base_offset, meta);
    }

    /// Entry whose base offset is exactly `base_offset`.
    pub fn get(&self, base_offset: u64) -> Option<&SegmentMeta> {
        self.segments.get(&base_offset)
    }

    /// Entry covering `offset`: greatest base at-or-below it whose range
    /// still contains it.
    pub fn find_for_offset(&self, offset: u64) -> Option<&SegmentMeta> {
        let (_, meta) = self.segments.range(..=offset).next_back()?;
        (offset <= meta.max_offset).then_some(meta)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentMeta> {
        self.segments.values()
    }
}
