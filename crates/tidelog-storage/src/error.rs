//! Storage Error Types
//!
//! This module defines all error types that can occur during segment
//! operations.
//!
//! ## Error Categories
//!
//! ### Structural Errors (caller precondition violations, never retried)
//! - `SegmentClosed`: Operation attempted on a closed segment
//! - `NotWritable`: Append attempted on a sealed segment (no appender)
//! - `AppendOrderingViolation`: Batch base offset does not follow the tail
//! - `InvalidTruncation`: Truncation target outside `[base, dirty]`
//!
//! ### Contention Errors (transient, retry with backoff)
//! - `LockTimeout`: Could not drain readers within the lock time budget
//!
//! ### Data Errors
//! - `Codec`: Batch framing error bubbled up from the parser
//! - `Io`: File system failure
//!
//! All storage operations return `Result<T>` aliased to `Result<T, Error>`,
//! allowing clean error propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment is closed")]
    SegmentClosed,

    #[error("segment has no appender")]
    NotWritable,

    #[error("append ordering violation: expected base offset {expected}, got {got}")]
    AppendOrderingViolation { expected: u64, got: u64 },

    #[error("invalid truncation to offset {offset} (base {base}, dirty {dirty})")]
    InvalidTruncation { offset: u64, base: u64, dirty: u64 },

    #[error("timed out waiting for segment lock")]
    LockTimeout,

    #[error("batch codec error: {0}")]
    Codec(#[from] tidelog_core::Error),
}
