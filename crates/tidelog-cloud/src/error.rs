//! Cloud Tier Error Types
//!
//! Hydration failures carry a classification (`DownloadErrorKind`) and the
//! cache path they targeted, so callers can distinguish a key that will never
//! exist (`NotFound`), exhausted transient retries (`TimedOut`,
//! `BucketError`), a corrupt object that needs manifest repair
//! (`IndexCorruption`), and a cancelled operation (`Aborted`). Permanent
//! classes must not be retried against the same key.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    /// The object does not exist; retrying the same key is pointless
    NotFound,
    /// Transient failures exhausted the retry budget
    TimedOut,
    /// The blob store rejected the request after retries
    BucketError,
    /// The downloaded segment's unparseable tail exceeds the tolerated
    /// budget; the manifest entry needs repair
    IndexCorruption,
    /// The operation observed a cancellation signal
    Aborted,
}

impl DownloadErrorKind {
    /// Permanent failures must not be retried against the same key.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            DownloadErrorKind::NotFound | DownloadErrorKind::IndexCorruption
        )
    }
}

impl std::fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadErrorKind::NotFound => "not found",
            DownloadErrorKind::TimedOut => "timed out",
            DownloadErrorKind::BucketError => "bucket error",
            DownloadErrorKind::IndexCorruption => "index corruption",
            DownloadErrorKind::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed ({kind}): {path}")]
    Download {
        kind: DownloadErrorKind,
        path: PathBuf,
    },

    #[error("remote segment is stopped")]
    Stopped,

    #[error("manifest has no segment at base offset {0}")]
    ManifestEntryNotFound(u64),

    #[error("batch parse error: {0}")]
    Parse(#[from] tidelog_core::Error),
}

/// Errors surfaced by a `BlobStore` implementation
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("transient blob store error: {0}")]
    Transient(String),
}
