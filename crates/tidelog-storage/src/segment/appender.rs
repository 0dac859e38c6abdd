//! Segment Appender - Exclusive Tail Writer
//!
//! The appender owns the sole mutable cursor into a segment file. Batches are
//! written strictly sequentially to the tail; the appender only ever moves the
//! cursor forward (append) or backward (truncate), never sideways.
//!
//! Durability follows a two-level discipline: `append` leaves bytes in the
//! page cache, `flush` pushes them to stable storage with `sync_data` (data
//! only, not metadata - the same trade the WAL world makes for fdatasync).
//! The segment's committed offset only advances on flush.
//!
//! The appender is NOT thread-safe on its own; the owning segment serializes
//! access through its write-state mutex.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;

/// Exclusive, sequential writer for the tail of a segment file
pub struct SegmentAppender {
    /// Path to the segment file
    path: PathBuf,

    /// File handle opened in append mode
    file: File,

    /// Current tail position in bytes
    file_offset: u64,
}

impl SegmentAppender {
    /// Open (or create) the segment file for appending.
    ///
    /// An existing file is resumed at its current size.
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let file_offset = file.metadata().await?.len();

        debug!(path = ?path, size = file_offset, "segment appender opened");

        Ok(Self {
            path,
            file,
            file_offset,
        })
    }

    /// Current tail position in bytes. Zero means the segment holds no data.
    pub fn file_byte_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` at the tail, returning the physical offset it starts at.
    pub async fn append(&mut self, data: &[u8]) -> Result<u64> {
        let physical = self.file_offset;
        self.file.write_all(data).await?;
        self.file_offset += data.len() as u64;
        Ok(physical)
    }

    /// Push buffered bytes to stable storage (data only, not metadata).
    pub async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    /// Rewind the tail to `physical` bytes, discarding everything after it.
    pub async fn truncate(&mut self, physical: u64) -> Result<()> {
        self.file.set_len(physical).await?;
        self.file_offset = physical;
        debug!(path = ?self.path, physical, "segment appender truncated");
        Ok(())
    }

    /// Flush and release the file handle.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        debug!(path = ?self.path, size = self.file_offset, "segment appender closed");
        Ok(())
    }
}
