//! Remote Segment - Cloud-Tier Counterpart of a Local Segment
//!
//! A `RemoteSegment` is a handle to one manifest entry: it holds no bytes of
//! its own, only the recipe for materializing them. `hydrate()` drives the
//! per-key state machine:
//!
//! ```text
//!           reserve_or_get
//!   Cold ───────────────────→ Hydrating ──── put ────→ Hydrated
//!    ↑                            │
//!    └──────── fail ──────────────┘
//!   (retried on next access)
//! ```
//!
//! - **Cold**: no cache entry. The first caller takes the download slot;
//!   concurrent callers wait on it and observe its outcome.
//! - **Hydrating**: the download runs under the segment's retry chain -
//!   bounded exponential backoff for transient blob-store errors, immediate
//!   permanent failure for missing objects, cancellation preempting any
//!   queued retry.
//! - **Hydrated**: the cache holds a byte-complete file; `data_stream(pos)`
//!   opens a fresh handle against it.
//!
//! Downloaded bytes are validated by a frame scan before they become
//! visible: an unparseable tail of up to `MAX_INDEX_ERROR_BYTES` is
//! tolerated (segments cut short by an unclean upload still serve their
//! intact prefix), anything beyond that is classified `IndexCorruption` -
//! a permanent failure requiring manifest repair, never a silent truncation.
//!
//! Offset vocabulary: **log offsets** count every batch including control
//! batches; **data offsets** are what consumers see. The manifest records
//! the cumulative control-batch count as `delta_offset`, so
//! `base_data_offset = base_log_offset - delta_offset`.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tidelog_core::RecordBatch;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, BufReader, ReadBuf};
use tracing::{debug, info, warn};

use crate::cache_service::{CacheLookup, CacheReservation, CacheService};
use crate::error::{BlobStoreError, DownloadErrorKind, Error, Result};
use crate::gate::{Gate, GateGuard};
use crate::manifest::{Manifest, SegmentMeta};
use crate::remote::BlobStore;
use crate::retry::RetryChain;

/// Tolerated unparseable tail in a downloaded segment. Any more is treated
/// as a failed hydration rather than a silently degraded index.
pub const MAX_INDEX_ERROR_BYTES: usize = 32 * 1024;

/// Handle to one remote-tier segment, hydratable into the local cache
pub struct RemoteSegment {
    api: Arc<dyn BlobStore>,
    cache: Arc<CacheService>,
    bucket: String,

    /// Snapshot of the manifest entry; never a live manifest reference
    meta: SegmentMeta,

    cache_key: String,
    rtc: RetryChain,
    gate: Gate,
}

impl RemoteSegment {
    /// Resolve the manifest entry at `base_offset` into a remote segment.
    /// The entry is copied out; the manifest's lifetime ends here.
    pub fn new(
        api: Arc<dyn BlobStore>,
        cache: Arc<CacheService>,
        bucket: impl Into<String>,
        manifest: &Manifest,
        base_offset: u64,
        parent: &RetryChain,
    ) -> Result<Self> {
        let meta = manifest
            .get(base_offset)
            .cloned()
            .ok_or(Error::ManifestEntryNotFound(base_offset))?;
        let bucket = bucket.into();
        let cache_key = format!("{}/{}", bucket, meta.key);

        Ok(Self {
            api,
            cache,
            bucket,
            meta,
            cache_key,
            rtc: parent.child(),
            gate: Gate::new(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.meta.key
    }

    pub fn term(&self) -> u64 {
        self.meta.term
    }

    /// Last log offset covered by the segment
    pub fn max_log_offset(&self) -> u64 {
        self.meta.max_offset
    }

    /// First log offset covered by the segment
    pub fn base_log_offset(&self) -> u64 {
        self.meta.base_offset
    }

    /// Control batches in all prior segments
    pub fn delta_offset(&self) -> u64 {
        self.meta.delta_offset
    }

    /// First consumer-visible offset: `base_log_offset - delta_offset`
    pub fn base_data_offset(&self) -> u64 {
        self.meta.base_offset - self.meta.delta_offset
    }

    /// Materialize the segment in the local cache and return its path.
    ///
    /// Returns immediately when hydrated; otherwise downloads through the
    /// retry chain, sharing one download among concurrent callers. Fails
    /// fast with `Stopped` after `stop()`.
    pub async fn hydrate(&self) -> Result<PathBuf> {
        let _gate = self.gate.enter()?;
        match self.cache.reserve_or_get(&self.cache_key).await? {
            CacheLookup::Hit(path) => {
                debug!(key = %self.cache_key, "segment already hydrated");
                Ok(path)
            }
            CacheLookup::Miss(reservation) => self.download(reservation).await,
        }
    }

    async fn download(&self, reservation: CacheReservation) -> Result<PathBuf> {
        let path = reservation.path();
        let mut attempt: usize = 0;

        loop {
            if self.rtc.is_cancelled() {
                reservation.fail(DownloadErrorKind::Aborted).await;
                return Err(Error::Download {
                    kind: DownloadErrorKind::Aborted,
                    path,
                });
            }

            match self.api.get_object(&self.bucket, &self.meta.key).await {
                Ok(bytes) => {
                    if let Err(kind) = validate_segment_bytes(&bytes) {
                        warn!(
                            key = %self.cache_key,
                            size = bytes.len(),
                            "downloaded segment failed validation"
                        );
                        reservation.fail(kind).await;
                        return Err(Error::Download { kind, path });
                    }
                    info!(
                        key = %self.cache_key,
                        size = bytes.len(),
                        attempts = attempt + 1,
                        "hydrated remote segment"
                    );
                    return reservation.put(bytes).await;
                }
                Err(BlobStoreError::NotFound { .. }) => {
                    reservation.fail(DownloadErrorKind::NotFound).await;
                    return Err(Error::Download {
                        kind: DownloadErrorKind::NotFound,
                        path,
                    });
                }
                Err(BlobStoreError::Transient(reason)) => {
                    if attempt >= self.rtc.policy().max_retries {
                        warn!(
                            key = %self.cache_key,
                            attempts = attempt + 1,
                            reason = %reason,
                            "download retries exhausted"
                        );
                        reservation.fail(DownloadErrorKind::TimedOut).await;
                        return Err(Error::Download {
                            kind: DownloadErrorKind::TimedOut,
                            path,
                        });
                    }
                    let backoff = self.rtc.policy().backoff(attempt);
                    warn!(
                        key = %self.cache_key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        reason = %reason,
                        "transient download failure, backing off"
                    );
                    if !self.rtc.sleep(backoff).await {
                        reservation.fail(DownloadErrorKind::Aborted).await;
                        return Err(Error::Download {
                            kind: DownloadErrorKind::Aborted,
                            path,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Open a byte stream over the hydrated segment starting at `pos`,
    /// hydrating first if needed. The stream holds a gate guard, so `stop()`
    /// waits for it to finish.
    pub async fn data_stream(&self, pos: u64) -> Result<RemoteSegmentDataStream> {
        let guard = self.gate.enter()?;
        let path = self.hydrate().await?;

        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(pos)).await?;

        Ok(RemoteSegmentDataStream {
            inner: BufReader::new(file),
            _gate: guard,
        })
    }

    /// Cancel in-flight hydration and wait for every gate holder to unwind.
    /// After this, `hydrate()`/`data_stream()` fail fast with `Stopped`.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        info!(key = %self.cache_key, "stopping remote segment");
        self.rtc.cancel();
        self.gate.close().await;
    }
}

/// Frame-scan the downloaded object, tolerating at most
/// `MAX_INDEX_ERROR_BYTES` of unparseable tail.
fn validate_segment_bytes(bytes: &Bytes) -> std::result::Result<(), DownloadErrorKind> {
    let mut cursor = bytes.clone();
    loop {
        match RecordBatch::decode(&mut cursor) {
            Ok(Some(_)) => continue,
            Ok(None) => return Ok(()),
            Err(_) => {
                if cursor.len() <= MAX_INDEX_ERROR_BYTES {
                    return Ok(());
                }
                return Err(DownloadErrorKind::IndexCorruption);
            }
        }
    }
}

/// Byte stream over a hydrated segment file; holds the segment's gate open
pub struct RemoteSegmentDataStream {
    inner: BufReader<File>,
    _gate: GateGuard,
}

impl AsyncRead for RemoteSegmentDataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}
