//! Remote Segment Batch Reader
//!
//! Per-consumption-session reader over a remote segment: lazily hydrates the
//! segment on first use, then pulls decoded batches through the streaming
//! parser on demand.
//!
//! ```text
//! read_some(deadline)
//!     ↓ (first call)
//! RemoteSegment::data_stream(0) ── hydrate if cold ──→ local cache file
//!     ↓
//! BatchStreamParser ── frames ──→ ring buffer ──→ caller
//! ```
//!
//! Each `read_some` call parses until the per-call byte budget fills, the
//! deadline elapses, or the segment is exhausted. Exhaustion is signalled by
//! an empty result with the reader latched done - not an error. Batches
//! below the configured start offset are dropped without touching the byte
//! budget; batches past the max offset end the session.
//!
//! Offsets surfaced to callers are the segment's log offsets; the consumer
//! translates to data offsets with the segment's `delta_offset`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tidelog_core::RecordBatch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::remote_segment::{RemoteSegment, RemoteSegmentDataStream};
use tidelog_storage::BatchStreamParser;

/// Bounds for one remote read session
#[derive(Debug, Clone)]
pub struct RemoteReadConfig {
    /// Batches whose base log offset is below this are dropped (and not
    /// counted against the byte budget)
    pub start_log_offset: u64,

    /// Batches whose base log offset exceeds this end the session
    pub max_log_offset: u64,

    /// Byte budget per `read_some` call (default: 1 MiB)
    pub max_bytes_per_read: usize,
}

impl RemoteReadConfig {
    pub fn new(start_log_offset: u64, max_log_offset: u64) -> Self {
        Self {
            start_log_offset,
            max_log_offset,
            max_bytes_per_read: 1024 * 1024,
        }
    }
}

/// Streaming batch reader over one remote segment
pub struct RemoteSegmentBatchReader {
    segment: Arc<RemoteSegment>,
    config: RemoteReadConfig,
    parser: Option<BatchStreamParser<RemoteSegmentDataStream>>,
    ring: VecDeque<RecordBatch>,
    bytes_produced: usize,
    done: bool,
}

impl RemoteSegmentBatchReader {
    pub fn new(segment: Arc<RemoteSegment>, config: RemoteReadConfig) -> Self {
        Self {
            segment,
            config,
            parser: None,
            ring: VecDeque::new(),
            bytes_produced: 0,
            done: false,
        }
    }

    pub fn max_log_offset(&self) -> u64 {
        self.segment.max_log_offset()
    }

    pub fn base_log_offset(&self) -> u64 {
        self.segment.base_log_offset()
    }

    /// Total bytes of batches produced over the session
    pub fn bytes_produced(&self) -> usize {
        self.bytes_produced
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Produce the next run of decoded batches.
    ///
    /// An empty result with the reader done means end-of-segment; an empty
    /// result while not done means the deadline elapsed (call again). A
    /// framing error fails the session and returns nothing partial.
    pub async fn read_some(&mut self, deadline: Duration) -> Result<Vec<RecordBatch>> {
        let deadline = Instant::now() + deadline;

        if self.done {
            return Ok(self.ring.drain(..).collect());
        }

        if self.parser.is_none() {
            // Hydration can dominate the first call; give up at the deadline
            // and let the caller come back (the download continues under the
            // cache's reservation only if another reader drives it - a fresh
            // call here starts it again)
            match tokio::time::timeout_at(deadline, self.segment.data_stream(0)).await {
                Ok(Ok(stream)) => {
                    self.parser = Some(BatchStreamParser::new(stream));
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(Vec::new()),
            }
        }

        let mut produced = 0usize;
        while !self.done
            && produced < self.config.max_bytes_per_read
            && Instant::now() < deadline
        {
            let parser = match self.parser.as_mut() {
                Some(parser) => parser,
                None => break,
            };
            match parser.next_batch().await {
                Ok(None) => {
                    debug!(
                        base_log_offset = self.segment.base_log_offset(),
                        "remote segment exhausted"
                    );
                    self.done = true;
                }
                Ok(Some(batch)) => {
                    if batch.base_offset < self.config.start_log_offset {
                        // Dropped without counting against the budget
                        continue;
                    }
                    if batch.base_offset > self.config.max_log_offset {
                        self.done = true;
                        continue;
                    }
                    produced += batch.encoded_len();
                    self.ring.push_back(batch);
                }
                Err(e) => {
                    // A torn frame poisons the session; nothing partially
                    // decoded leaves the reader
                    self.done = true;
                    self.parser = None;
                    self.ring.clear();
                    return Err(e.into());
                }
            }
        }

        self.bytes_produced += produced;
        Ok(self.ring.drain(..).collect())
    }

    /// Tear down the parser and release the segment's gate hold. Safe to
    /// call at any point in the session.
    pub async fn stop(&mut self) {
        debug!(
            base_log_offset = self.segment.base_log_offset(),
            "stopping remote batch reader"
        );
        self.parser = None;
        self.ring.clear();
        self.done = true;
    }
}
