//! Tidelog Storage - Local Log-Segment Engine
//!
//! This crate implements the local half of the tidelog storage engine: the
//! append-only `Segment`, its exclusive appender and shareable reader, the
//! sparse offset index, the in-memory batch cache, and the streaming batch
//! parser. The cloud tier (`tidelog-cloud`) builds on the same batch framing
//! and parser to serve segments rehydrated from a remote blob store.
//!
//! ## Write Path
//!
//! ```text
//! append(batch)
//!     ↓
//! ordering check (batch must extend the tail exactly)
//!     ↓
//! SegmentAppender ── bytes to the tail of the file
//!     ↓
//! SegmentIndex ───── one sparse sample per 32 KiB stride
//!     ↓
//! CompactedTopicIndex ── key -> physical (compacted topics only)
//!     ↓
//! BatchCacheIndex ── batch kept hot for tailing consumers
//!     ↓
//! dirty_offset = batch.last_offset()
//! ```
//!
//! ## Read Path
//!
//! `cache_get` serves tailing reads from memory; a miss falls through to
//! `offset_data_stream`, which resolves the nearest index sample and streams
//! bytes from disk through `BatchStreamParser`.

pub mod batch_cache;
pub mod config;
pub mod error;
pub mod parser;
pub mod segment;

pub use batch_cache::{BatchCacheIndex, ReadResult};
pub use config::SegmentConfig;
pub use error::{Error, Result};
pub use parser::BatchStreamParser;
pub use segment::{
    AppendResult, CompactedTopicIndex, IndexEntry, OffsetTracker, Segment, SegmentAppender,
    SegmentDataStream, SegmentIndex, SegmentReader,
};
