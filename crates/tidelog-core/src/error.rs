//! Error Types for Batch Framing
//!
//! This module defines the errors that can occur while encoding or decoding
//! record batch frames.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - File system operations while scanning a segment file
//!
//! ### Data Integrity Errors
//! - `TruncatedBatch`: A frame was cut short (unclean shutdown, partial download)
//! - `CrcMismatch`: Data corruption detected via checksum
//!
//! ### Framing Errors
//! - `InvalidFrameLength`: The length prefix is implausible (too small or too large)
//! - `InvalidBatchType`: Unknown batch type tag
//! - `InvalidRecordCount`: A batch must contain at least one record
//!
//! All functions in this crate return `Result<T>` which is aliased to
//! `Result<T, Error>`, allowing clean error propagation with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated batch frame: expected {expected} bytes, got {actual}")]
    TruncatedBatch { expected: usize, actual: usize },

    #[error("batch CRC mismatch")]
    CrcMismatch,

    #[error("invalid batch type: {0}")]
    InvalidBatchType(u8),

    #[error("invalid batch frame length: {0}")]
    InvalidFrameLength(u32),

    #[error("batch record count must be non-zero")]
    InvalidRecordCount,
}

pub type Result<T> = std::result::Result<T, Error>;
