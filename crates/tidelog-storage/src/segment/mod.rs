//! Log Segment - One Contiguous Slice of a Partition
//!
//! A segment is the on-disk unit of a partition's log: a gap-free run of
//! record batches produced under one term, starting at a base offset. This
//! module composes the per-concern pieces into the `Segment` aggregate:
//!
//! ```text
//! ┌──────────────────────────── Segment ─────────────────────────────┐
//! │ OffsetTracker     base / committed / dirty offsets + term        │
//! │ SegmentAppender   exclusive tail writer (Writable segments only) │
//! │ SegmentReader     shared byte-range streams                      │
//! │ SegmentIndex      sparse offset -> byte-position samples         │
//! │ BatchCacheIndex   bounded in-memory batch cache (optional)       │
//! │ CompactedTopicIndex  key -> physical map (compacted topics only) │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write/Read Discipline
//!
//! Appends are serialized by the write-state mutex and enforce strict
//! ordering: each batch must start exactly where the previous one ended.
//! Destructive operations (truncate, close, appender release) take the write
//! half of the segment lock and wait for every open data stream to finish;
//! streams hold the read half for their whole life. Truncation is bounded by
//! the configured lock timeout and fails with `LockTimeout` rather than
//! stalling the partition behind a slow reader.
//!
//! ## Lifecycle
//!
//! A segment is either **Writable** (created fresh, owns the single appender
//! it will ever have) or **Sealed** (opened from an existing file, immutable
//! apart from truncation and deletion). Sealing is one-way: releasing the
//! appender or closing the segment never brings it back. A tombstoned
//! segment deletes its backing file when closed.

pub mod appender;
pub mod compaction_index;
pub mod index;
pub mod reader;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidelog_core::{BatchType, RecordBatch};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use crate::batch_cache::{BatchCacheIndex, ReadResult};
use crate::config::SegmentConfig;
use crate::error::{Error, Result};
use crate::parser::BatchStreamParser;

pub use appender::SegmentAppender;
pub use compaction_index::CompactedTopicIndex;
pub use index::{IndexEntry, SegmentIndex};
pub use reader::{SegmentDataStream, SegmentReader};

/// Offsets of a segment within its partition's log.
///
/// `committed_offset` and `dirty_offset` track the *last* offset of the most
/// recent batch (not its base): `dirty_offset` advances on every append,
/// `committed_offset` only when those bytes have been flushed to stable
/// storage. Invariant: `base_offset <= committed_offset <= dirty_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTracker {
    /// Leadership term the segment was produced under
    pub term: u64,

    /// First offset covered by the segment
    pub base_offset: u64,

    /// Last offset known durable on disk
    pub committed_offset: u64,

    /// Last offset appended (possibly still in the page cache)
    pub dirty_offset: u64,
}

impl OffsetTracker {
    pub fn new(term: u64, base_offset: u64) -> Self {
        Self {
            term,
            base_offset,
            committed_offset: base_offset,
            dirty_offset: base_offset,
        }
    }
}

impl std::fmt::Display for OffsetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{term: {}, base: {}, committed: {}, dirty: {}}}",
            self.term, self.base_offset, self.committed_offset, self.dirty_offset
        )
    }
}

/// Outcome of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub base_offset: u64,
    pub last_offset: u64,
    pub byte_size: usize,
}

/// Write capability, selected at construction and revoked at most once.
enum WriteState {
    Writable { appender: SegmentAppender },
    Sealed,
}

/// A contiguous, append-only slice of a partition's log
pub struct Segment {
    tracker: Mutex<OffsetTracker>,
    reader: SegmentReader,
    index: Mutex<SegmentIndex>,
    write_state: Mutex<WriteState>,
    compaction_index: Option<Mutex<CompactedTopicIndex>>,
    cache: Option<Mutex<BatchCacheIndex>>,

    /// Guards structural mutation (truncate/close/seal) against open streams
    destructive_ops: Arc<RwLock<()>>,

    /// Appended bytes, flushed or not. The reader's bound (`file_size`)
    /// trails this and only advances on flush, so streams never observe
    /// bytes that could still disappear in a crash.
    tail_bytes: AtomicU64,

    /// Shared with the reader and every live stream
    closed: Arc<AtomicBool>,
    tombstone: AtomicBool,
    config: SegmentConfig,
}

impl Segment {
    /// Create a fresh writable segment backed by `path`.
    ///
    /// The segment carries its one-and-only appender and a batch cache. Use
    /// `with_compaction_index` for segments of key-compacted topics and
    /// `without_cache` where the partition opts out of read caching.
    pub async fn create(
        path: PathBuf,
        term: u64,
        base_offset: u64,
        config: SegmentConfig,
    ) -> Result<Self> {
        let appender = SegmentAppender::create(&path).await?;
        let reader = SegmentReader::new(path, appender.file_byte_offset());
        let closed = reader.closed_handle();

        info!(
            path = ?reader.path(),
            term,
            base_offset,
            "created writable segment"
        );

        let tail_bytes = AtomicU64::new(appender.file_byte_offset());
        Ok(Self {
            tracker: Mutex::new(OffsetTracker::new(term, base_offset)),
            index: Mutex::new(SegmentIndex::new(base_offset, config.index_stride_bytes)),
            write_state: Mutex::new(WriteState::Writable { appender }),
            compaction_index: None,
            cache: Some(Mutex::new(BatchCacheIndex::new(config.cache_max_bytes))),
            destructive_ops: Arc::new(RwLock::new(())),
            tail_bytes,
            closed,
            tombstone: AtomicBool::new(false),
            reader,
            config,
        })
    }

    /// Open an existing sealed segment (no appender, ever).
    ///
    /// Offsets and the sparse index are recovered by `materialize_index`;
    /// until then the tracker sits at `base_offset`.
    pub async fn open(
        path: PathBuf,
        term: u64,
        base_offset: u64,
        config: SegmentConfig,
    ) -> Result<Self> {
        let size = tokio::fs::metadata(&path).await?.len();
        let reader = SegmentReader::new(path, size);
        let closed = reader.closed_handle();

        info!(
            path = ?reader.path(),
            term,
            base_offset,
            size,
            "opened sealed segment"
        );

        Ok(Self {
            tracker: Mutex::new(OffsetTracker::new(term, base_offset)),
            index: Mutex::new(SegmentIndex::new(base_offset, config.index_stride_bytes)),
            write_state: Mutex::new(WriteState::Sealed),
            compaction_index: None,
            cache: Some(Mutex::new(BatchCacheIndex::new(config.cache_max_bytes))),
            destructive_ops: Arc::new(RwLock::new(())),
            tail_bytes: AtomicU64::new(size),
            closed,
            tombstone: AtomicBool::new(false),
            reader,
            config,
        })
    }

    /// Attach a compacted-topic key index (key-compacted topics only).
    pub fn with_compaction_index(mut self) -> Self {
        self.compaction_index = Some(Mutex::new(CompactedTopicIndex::new()));
        self
    }

    /// Drop the batch cache; reads always go to disk.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    fn check_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::SegmentClosed)
        } else {
            Ok(())
        }
    }

    /// Append a batch at the tail.
    ///
    /// The batch must start exactly one past the dirty offset (or at the base
    /// offset when the segment is empty); anything else is an
    /// `AppendOrderingViolation` and leaves the segment untouched. On success
    /// the dirty offset advances to the batch's last offset, an index sample
    /// may be taken, the compaction key (if any) is indexed, and the batch is
    /// stored in the cache.
    pub async fn append(&self, batch: &RecordBatch) -> Result<AppendResult> {
        self.check_not_closed()?;

        let mut state = self.write_state.lock().await;
        let appender = match &mut *state {
            WriteState::Writable { appender } => appender,
            WriteState::Sealed => return Err(Error::NotWritable),
        };

        let expected = {
            let tracker = self.tracker.lock().await;
            if appender.file_byte_offset() == 0 {
                tracker.base_offset
            } else {
                tracker.dirty_offset + 1
            }
        };
        if batch.base_offset != expected {
            return Err(Error::AppendOrderingViolation {
                expected,
                got: batch.base_offset,
            });
        }

        let data = batch.to_bytes();
        let physical = appender.append(&data).await?;
        // Streams only see these bytes after flush; the cache serves them now
        self.tail_bytes
            .store(appender.file_byte_offset(), Ordering::Release);

        self.index.lock().await.maybe_track(
            batch.base_offset,
            batch.first_timestamp,
            physical,
            data.len(),
        );

        if let (Some(compaction), Some(key)) = (&self.compaction_index, &batch.key) {
            compaction.lock().await.index(key.clone(), physical);
        }

        self.cache_put(batch).await;

        self.tracker.lock().await.dirty_offset = batch.last_offset();

        debug!(
            base_offset = batch.base_offset,
            last_offset = batch.last_offset(),
            bytes = data.len(),
            "appended batch"
        );

        Ok(AppendResult {
            base_offset: batch.base_offset,
            last_offset: batch.last_offset(),
            byte_size: data.len(),
        })
    }

    /// Flush appended bytes to stable storage and advance the committed
    /// offset to the dirty offset observed at entry.
    pub async fn flush(&self) -> Result<()> {
        self.check_not_closed()?;
        let dirty = self.tracker.lock().await.dirty_offset;

        let mut state = self.write_state.lock().await;
        if let WriteState::Writable { appender } = &mut *state {
            appender.flush().await?;
            self.reader.set_file_size(appender.file_byte_offset());
        }
        drop(state);

        let mut tracker = self.tracker.lock().await;
        if dirty > tracker.committed_offset {
            tracker.committed_offset = dirty;
        }
        Ok(())
    }

    /// Rewind the segment so `offset` is the last offset it holds, with
    /// `physical` the matching byte size of the file (0 empties the segment).
    ///
    /// Requires the write lock; fails with `LockTimeout` if readers cannot be
    /// drained within the configured budget, and `InvalidTruncation` when the
    /// target lies outside `[base_offset, dirty_offset]`.
    pub async fn truncate(&self, offset: u64, physical: u64) -> Result<()> {
        let _guard = self.write_lock(self.config.lock_timeout()).await?;
        self.check_not_closed()?;

        {
            let tracker = self.tracker.lock().await;
            if offset < tracker.base_offset || offset > tracker.dirty_offset {
                return Err(Error::InvalidTruncation {
                    offset,
                    base: tracker.base_offset,
                    dirty: tracker.dirty_offset,
                });
            }
        }

        let mut state = self.write_state.lock().await;
        match &mut *state {
            WriteState::Writable { appender } => appender.truncate(physical).await?,
            WriteState::Sealed => {
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(self.reader.path())
                    .await?;
                file.set_len(physical).await?;
            }
        }
        drop(state);
        self.tail_bytes.store(physical, Ordering::Release);
        self.reader.set_file_size(physical);

        self.index.lock().await.truncate(offset, physical);

        if let Some(cache) = &self.cache {
            // An emptied segment (physical == 0) keeps no batch at all, not
            // even one ending exactly at `offset`
            let cutoff = if physical == 0 { offset } else { offset + 1 };
            cache.lock().await.truncate(cutoff);
        }
        if let Some(compaction) = &self.compaction_index {
            compaction.lock().await.truncate(physical);
        }

        let mut tracker = self.tracker.lock().await;
        tracker.dirty_offset = offset;
        tracker.committed_offset = tracker.committed_offset.min(offset);

        info!(offset, physical, offsets = %*tracker, "truncated segment");
        Ok(())
    }

    /// Seal the segment: flush, release the appender, advance the committed
    /// offset. Later appends fail with `NotWritable`.
    pub async fn release_appender(&self) -> Result<()> {
        let _guard = self.write_lock(self.config.lock_timeout()).await?;
        self.check_not_closed()?;

        let dirty = self.tracker.lock().await.dirty_offset;
        let mut state = self.write_state.lock().await;
        if let WriteState::Writable { appender } =
            std::mem::replace(&mut *state, WriteState::Sealed)
        {
            self.reader.set_file_size(appender.file_byte_offset());
            appender.close().await?;
            drop(state);

            let mut tracker = self.tracker.lock().await;
            if dirty > tracker.committed_offset {
                tracker.committed_offset = dirty;
            }
            info!(offsets = %*tracker, "released segment appender");
        }
        Ok(())
    }

    /// Close the segment: drain all readers, flush and drop the appender,
    /// release index and cache memory, and delete the file when tombstoned.
    ///
    /// After close every operation (and every live stream) fails with
    /// `SegmentClosed`; a second close fails the same way.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.destructive_ops.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::SegmentClosed);
        }

        let dirty = self.tracker.lock().await.dirty_offset;
        let mut state = self.write_state.lock().await;
        if let WriteState::Writable { appender } =
            std::mem::replace(&mut *state, WriteState::Sealed)
        {
            self.reader.set_file_size(appender.file_byte_offset());
            appender.close().await?;
            let mut tracker = self.tracker.lock().await;
            if dirty > tracker.committed_offset {
                tracker.committed_offset = dirty;
            }
        }
        drop(state);

        self.index.lock().await.clear();
        if let Some(cache) = &self.cache {
            cache.lock().await.clear();
        }

        if self.tombstone.load(Ordering::Acquire) {
            match tokio::fs::remove_file(self.reader.path()).await {
                Ok(()) => info!(path = ?self.reader.path(), "removed tombstoned segment"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = ?self.reader.path(),
                    error = %e,
                    "failed to remove tombstoned segment"
                ),
            }
        }

        info!(path = ?self.reader.path(), "closed segment");
        Ok(())
    }

    /// Open a byte stream positioned at the index-resolved physical offset
    /// nearest at-or-below `offset`. The stream holds the segment's read
    /// lock until dropped and fails if the segment closes mid-stream.
    pub async fn offset_data_stream(&self, offset: u64) -> Result<SegmentDataStream> {
        self.check_not_closed()?;
        let guard = self.destructive_ops.clone().read_owned().await;
        // Close may have won the race while we waited for the lock
        self.check_not_closed()?;

        let physical = self
            .index
            .lock()
            .await
            .lookup(offset)
            .map(|entry| entry.physical)
            .unwrap_or(0);

        let stream = self.reader.data_stream(physical).await?;
        Ok(stream.with_read_guard(guard))
    }

    /// Rebuild the sparse index by re-parsing the segment file, when the
    /// index is empty or untrusted (unclean shutdown, freshly opened sealed
    /// segment). Tolerates a truncated tail. Also recovers the tracker's
    /// dirty/committed offsets from the last parsed batch. Returns whether a
    /// rebuild happened.
    pub async fn materialize_index(&self) -> Result<bool> {
        self.check_not_closed()?;
        if !self.index.lock().await.is_empty() || self.reader.empty() {
            return Ok(false);
        }

        let _guard = self.destructive_ops.clone().read_owned().await;
        let stream = self.reader.data_stream(0).await?;
        let mut parser = BatchStreamParser::new(stream);

        let (base_offset, stride) = {
            let index = self.index.lock().await;
            (index.base_offset(), self.config.index_stride_bytes)
        };
        let mut rebuilt = SegmentIndex::new(base_offset, stride);
        let mut last_offset = None;

        loop {
            let physical = parser.bytes_consumed();
            match parser.next_batch().await {
                Ok(Some(batch)) => {
                    rebuilt.maybe_track(
                        batch.base_offset,
                        batch.first_timestamp,
                        physical,
                        batch.encoded_len(),
                    );
                    last_offset = Some(batch.last_offset());
                }
                Ok(None) => break,
                Err(tidelog_core::Error::TruncatedBatch { .. }) => {
                    warn!(
                        path = ?self.reader.path(),
                        physical,
                        "truncated tail while rebuilding index"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        *self.index.lock().await = rebuilt;
        if let Some(last) = last_offset {
            let mut tracker = self.tracker.lock().await;
            tracker.dirty_offset = tracker.dirty_offset.max(last);
            tracker.committed_offset = tracker.committed_offset.max(last);
        }

        info!(path = ?self.reader.path(), "materialized segment index");
        Ok(true)
    }

    /// Read cached batches from `offset`. Without a cache (or on a complete
    /// miss) the result is empty with `next_batch = offset`, telling the
    /// caller to re-request exactly that offset from disk.
    pub async fn cache_get(
        &self,
        offset: u64,
        max_offset: u64,
        type_filter: Option<BatchType>,
        min_first_timestamp: Option<u64>,
        max_bytes: usize,
    ) -> ReadResult {
        match &self.cache {
            Some(cache) => cache.lock().await.read(
                offset,
                max_offset,
                type_filter,
                min_first_timestamp,
                max_bytes,
            ),
            None => ReadResult {
                batches: Vec::new(),
                next_batch: offset,
            },
        }
    }

    /// Store a batch in the cache, best-effort.
    pub async fn cache_put(&self, batch: &RecordBatch) {
        if let Some(cache) = &self.cache {
            cache.lock().await.put(batch.clone());
        }
    }

    /// Hold the read half of the segment lock.
    pub async fn read_lock(&self) -> OwnedRwLockReadGuard<()> {
        self.destructive_ops.clone().read_owned().await
    }

    /// Hold the write half of the segment lock, waiting at most `timeout`
    /// for readers to drain.
    pub async fn write_lock(&self, timeout: Duration) -> Result<OwnedRwLockWriteGuard<()>> {
        tokio::time::timeout(timeout, self.destructive_ops.clone().write_owned())
            .await
            .map_err(|_| Error::LockTimeout)
    }

    /// Snapshot of the segment's offsets.
    pub async fn offsets(&self) -> OffsetTracker {
        *self.tracker.lock().await
    }

    /// Whether the segment still carries its appender.
    pub async fn is_writable(&self) -> bool {
        matches!(&*self.write_state.lock().await, WriteState::Writable { .. })
    }

    /// Whether any bytes have been appended, flushed or not.
    pub fn empty(&self) -> bool {
        self.size_bytes() == 0
    }

    /// Appended bytes, flushed or not. `reader().file_size()` is the
    /// flush-bounded view streams observe.
    pub fn size_bytes(&self) -> u64 {
        self.tail_bytes.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn has_compaction_index(&self) -> bool {
        self.compaction_index.is_some()
    }

    /// Schedule the backing file for deletion once the segment closes.
    pub fn tombstone(&self) {
        self.tombstone.store(true, Ordering::Release);
    }

    pub fn reader(&self) -> &SegmentReader {
        &self.reader
    }

    /// Physical offset of the newest batch carrying `key`, when a compaction
    /// index is attached.
    pub async fn compaction_lookup(&self, key: &[u8]) -> Option<u64> {
        match &self.compaction_index {
            Some(compaction) => compaction.lock().await.lookup(key),
            None => None,
        }
    }
}
