//! Segment Reader - Shared Byte-Range Access
//!
//! The reader is the shareable half of a segment: any number of concurrent
//! streams may be open against the same file, each with its own handle and
//! position. A stream is bounded by the on-disk size observed when it was
//! opened, so readers never see bytes an in-flight append has not finished
//! writing.
//!
//! Every stream carries the segment's closed flag and checks it on each poll:
//! when the segment closes mid-stream, the next read fails instead of racing
//! the released file handles. Streams opened through the segment also hold
//! the segment's read lock for their whole life, which is what `close` and
//! `truncate` wait on.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader, ReadBuf, Take};
use tokio::sync::OwnedRwLockReadGuard;

use crate::error::{Error, Result};

/// Shareable reader over a segment's byte range
pub struct SegmentReader {
    /// Path to the segment file
    path: PathBuf,

    /// On-disk size; advanced by the owning segment after each append
    file_size: Arc<AtomicU64>,

    /// Set once when the owning segment closes
    closed: Arc<AtomicBool>,
}

impl SegmentReader {
    pub fn new(path: PathBuf, file_size: u64) -> Self {
        Self {
            path,
            file_size: Arc::new(AtomicU64::new(file_size)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current readable size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    pub fn empty(&self) -> bool {
        self.file_size() == 0
    }

    pub(crate) fn set_file_size(&self, size: u64) {
        self.file_size.store(size, Ordering::Release);
    }

    /// Shared handle to the closed flag, held by the owning segment.
    pub(crate) fn closed_handle(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Open a byte stream at physical position `pos`, bounded by the current
    /// on-disk size.
    pub async fn data_stream(&self, pos: u64) -> Result<SegmentDataStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SegmentClosed);
        }

        let size = self.file_size();
        let pos = pos.min(size);
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(pos)).await?;

        Ok(SegmentDataStream {
            inner: BufReader::new(file).take(size - pos),
            closed: self.closed.clone(),
            _read_guard: None,
        })
    }
}

/// Byte stream over a segment's data, failing fast once the segment closes
pub struct SegmentDataStream {
    inner: Take<BufReader<File>>,
    closed: Arc<AtomicBool>,
    /// Keeps the segment's read lock held for the stream's lifetime
    _read_guard: Option<OwnedRwLockReadGuard<()>>,
}

impl SegmentDataStream {
    pub(crate) fn with_read_guard(mut self, guard: OwnedRwLockReadGuard<()>) -> Self {
        self._read_guard = Some(guard);
        self
    }

    /// Bytes remaining before the stream's bound
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl AsyncRead for SegmentDataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "segment closed",
            )));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
