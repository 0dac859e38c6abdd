//! Tidelog Cloud - Remote Tier for the Segment Engine
//!
//! When a partition's local segments are evicted to reclaim disk, their bytes
//! live on only in the remote blob store, catalogued by the partition
//! manifest. This crate rehydrates them on demand:
//!
//! ```text
//! consumer read at a cold offset
//!     ↓
//! Manifest ── which object covers the offset?
//!     ↓
//! RemoteSegment::hydrate ── CacheService (single-flight) ── BlobStore
//!     ↓                            │
//! local cache file  ←── validate + atomic rename
//!     ↓
//! RemoteSegmentBatchReader ── BatchStreamParser ──→ decoded batches
//! ```
//!
//! Retries are governed by a `RetryChain` (exponential backoff under a
//! hierarchical cancellation token); teardown by a counted `Gate` so a
//! segment is never destroyed under a live operation.

pub mod batch_reader;
pub mod cache_service;
pub mod error;
pub mod gate;
pub mod manifest;
pub mod remote;
pub mod remote_segment;
pub mod retry;

pub use batch_reader::{RemoteReadConfig, RemoteSegmentBatchReader};
pub use cache_service::{CacheLookup, CacheReservation, CacheService, CacheStats};
pub use error::{BlobStoreError, DownloadErrorKind, Error, Result};
pub use gate::{Gate, GateGuard};
pub use manifest::{Manifest, SegmentMeta};
pub use remote::{BlobResult, BlobStore, ObjectStoreAdapter};
pub use remote_segment::{RemoteSegment, RemoteSegmentDataStream, MAX_INDEX_ERROR_BYTES};
pub use retry::{RetryChain, RetryPolicy};
