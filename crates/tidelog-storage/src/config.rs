//! Segment Configuration
//!
//! Controls the sampling density of the sparse offset index, the batch cache
//! budget, and how long destructive operations wait for readers to drain.
//!
//! ## Usage
//!
//! ```ignore
//! use tidelog_storage::SegmentConfig;
//!
//! // Defaults: 32 KiB index stride, 32 MiB cache, 5s lock timeout
//! let config = SegmentConfig::default();
//!
//! // Denser index for latency-sensitive random reads
//! let config = SegmentConfig {
//!     index_stride_bytes: 4 * 1024,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Appended bytes between sparse index samples (default: 32 KiB)
    #[serde(default = "default_index_stride_bytes")]
    pub index_stride_bytes: usize,

    /// Batch cache byte budget per segment (default: 32 MiB)
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,

    /// Time budget for destructive operations waiting on the segment lock
    /// (default: 5000 ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl SegmentConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            index_stride_bytes: default_index_stride_bytes(),
            cache_max_bytes: default_cache_max_bytes(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_index_stride_bytes() -> usize {
    32 * 1024
}

fn default_cache_max_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}
