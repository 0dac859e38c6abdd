//! Record Batch Model and Wire Framing
//!
//! This module defines `RecordBatch` - the unit of storage in a tidelog
//! segment - and its on-disk frame format.
//!
//! ## What is a Batch?
//!
//! A batch is a contiguous run of records produced together. The engine treats
//! the record payload as opaque bytes; only the framing metadata (offsets,
//! record count, type, timestamps) is interpreted. A segment file is nothing
//! more than a sequence of these frames laid end to end.
//!
//! ## Frame Format
//!
//! All integers are big-endian:
//!
//! ```text
//! ┌────────────┬───────────┬─────────────┬──────────────┬────────────┐
//! │ Frame Len  │ CRC32     │ Base Offset │ Record Count │ Batch Type │
//! │ (4 bytes)  │ (4 bytes) │ (8 bytes)   │ (4 bytes)    │ (1 byte)   │
//! └────────────┴───────────┴─────────────┴──────────────┴────────────┘
//! ┌─────────────────┬───────────────┬──────────┬─────────┬──────────┐
//! │ First Timestamp │ Max Timestamp │ Key Len  │ Key     │ Records  │
//! │ (8 bytes)       │ (8 bytes)     │ (2 bytes)│ (K bytes)│ (N bytes)│
//! └─────────────────┴───────────────┴──────────┴─────────┴──────────┘
//! ```
//!
//! - **Frame Len** counts everything after itself (CRC through records).
//! - **CRC32** covers everything after itself, detecting corruption from
//!   disk or network.
//! - **Batch Type** distinguishes data batches from control batches
//!   (configuration, checkpoint). Control batches occupy log offsets but are
//!   invisible to consumers; the cloud tier tracks their cumulative count as
//!   an offset delta.
//! - **Key** is the optional compaction key for key-compacted topics. A key
//!   length of zero means no key.
//!
//! ## Offset Convention
//!
//! A batch spans offsets `base_offset ..= base_offset + record_count - 1`;
//! the upper bound is `last_offset()`. Appends are strictly sequential, so a
//! segment's batches form a gap-free run of offsets.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Frame bytes between the length prefix and the variable-length tail:
/// CRC (4) + base offset (8) + record count (4) + type (1)
/// + first timestamp (8) + max timestamp (8) + key length (2).
pub const FRAME_HEADER_SIZE: usize = 35;

/// Upper bound on a single frame. Anything larger is treated as corruption
/// rather than an allocation request.
pub const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

/// Type tag for a record batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchType {
    /// Application records, visible to consumers
    Data = 0,
    /// Control batch: partition configuration change
    Configuration = 1,
    /// Control batch: consensus checkpoint marker
    Checkpoint = 2,
}

impl BatchType {
    /// Control batches occupy log offsets but are excluded from the
    /// consumer-visible (data) offset space.
    pub fn is_data(self) -> bool {
        matches!(self, BatchType::Data)
    }
}

impl TryFrom<u8> for BatchType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BatchType::Data),
            1 => Ok(BatchType::Configuration),
            2 => Ok(BatchType::Checkpoint),
            _ => Err(Error::InvalidBatchType(value)),
        }
    }
}

/// A batch of records within a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBatch {
    /// Offset of the first record in the batch
    pub base_offset: u64,

    /// Number of records in the batch (always >= 1)
    pub record_count: u32,

    /// Batch type tag
    pub batch_type: BatchType,

    /// Timestamp of the first record, milliseconds since epoch
    pub first_timestamp: u64,

    /// Timestamp of the last record, milliseconds since epoch
    pub max_timestamp: u64,

    /// Optional compaction key
    pub key: Option<Bytes>,

    /// Opaque record payload
    pub records: Bytes,
}

impl RecordBatch {
    pub fn new(
        base_offset: u64,
        record_count: u32,
        batch_type: BatchType,
        first_timestamp: u64,
        max_timestamp: u64,
        key: Option<Bytes>,
        records: Bytes,
    ) -> Self {
        Self {
            base_offset,
            record_count,
            batch_type,
            first_timestamp,
            max_timestamp,
            key,
            records,
        }
    }

    /// Create a data batch whose records share one timestamp.
    pub fn data(base_offset: u64, record_count: u32, timestamp: u64, records: Bytes) -> Self {
        Self::new(
            base_offset,
            record_count,
            BatchType::Data,
            timestamp,
            timestamp,
            None,
            records,
        )
    }

    /// Create a single-record control batch of the given type.
    pub fn control(base_offset: u64, batch_type: BatchType, timestamp: u64) -> Self {
        Self::new(
            base_offset,
            1,
            batch_type,
            timestamp,
            timestamp,
            None,
            Bytes::new(),
        )
    }

    /// Attach a compaction key.
    pub fn with_key(mut self, key: Bytes) -> Self {
        self.key = Some(key);
        self
    }

    /// Offset of the last record in the batch
    pub fn last_offset(&self) -> u64 {
        self.base_offset + self.record_count as u64 - 1
    }

    fn key_len(&self) -> usize {
        self.key.as_ref().map(|k| k.len()).unwrap_or(0)
    }

    /// Length of the frame body (everything after the length prefix)
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.key_len() + self.records.len()
    }

    /// Total on-disk size of the batch, length prefix included
    pub fn encoded_len(&self) -> usize {
        4 + self.frame_len()
    }

    /// Encode the batch frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_len() as u32);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.base_offset.to_be_bytes());
        hasher.update(&self.record_count.to_be_bytes());
        hasher.update(&[self.batch_type as u8]);
        hasher.update(&self.first_timestamp.to_be_bytes());
        hasher.update(&self.max_timestamp.to_be_bytes());
        hasher.update(&(self.key_len() as u16).to_be_bytes());
        if let Some(key) = &self.key {
            hasher.update(key);
        }
        hasher.update(&self.records);
        buf.put_u32(hasher.finalize());

        buf.put_u64(self.base_offset);
        buf.put_u32(self.record_count);
        buf.put_u8(self.batch_type as u8);
        buf.put_u64(self.first_timestamp);
        buf.put_u64(self.max_timestamp);
        buf.put_u16(self.key_len() as u16);
        if let Some(key) = &self.key {
            buf.put_slice(key);
        }
        buf.put_slice(&self.records);
    }

    /// Encode the batch into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a frame body (the bytes after the length prefix).
    pub fn decode_frame(frame: &[u8]) -> Result<RecordBatch> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(Error::TruncatedBatch {
                expected: FRAME_HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let mut buf = frame;
        let crc = buf.get_u32();
        if crc != crc32fast::hash(&frame[4..]) {
            return Err(Error::CrcMismatch);
        }

        let base_offset = buf.get_u64();
        let record_count = buf.get_u32();
        if record_count == 0 {
            return Err(Error::InvalidRecordCount);
        }
        let batch_type = BatchType::try_from(buf.get_u8())?;
        let first_timestamp = buf.get_u64();
        let max_timestamp = buf.get_u64();
        let key_len = buf.get_u16() as usize;
        if buf.remaining() < key_len {
            return Err(Error::TruncatedBatch {
                expected: key_len,
                actual: buf.remaining(),
            });
        }
        let key = if key_len > 0 {
            Some(Bytes::copy_from_slice(&buf[..key_len]))
        } else {
            None
        };
        buf.advance(key_len);
        let records = Bytes::copy_from_slice(buf);

        Ok(RecordBatch {
            base_offset,
            record_count,
            batch_type,
            first_timestamp,
            max_timestamp,
            key,
            records,
        })
    }

    /// Decode the next batch from a contiguous buffer, consuming it.
    ///
    /// Returns `Ok(None)` at a clean end of input (buffer empty at a frame
    /// boundary). A partial frame is reported as `TruncatedBatch`.
    pub fn decode(buf: &mut Bytes) -> Result<Option<RecordBatch>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() < 4 {
            return Err(Error::TruncatedBatch {
                expected: 4,
                actual: buf.len(),
            });
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (frame_len as usize) < FRAME_HEADER_SIZE || frame_len as usize > MAX_FRAME_BYTES {
            return Err(Error::InvalidFrameLength(frame_len));
        }
        if buf.len() < 4 + frame_len as usize {
            return Err(Error::TruncatedBatch {
                expected: 4 + frame_len as usize,
                actual: buf.len(),
            });
        }

        buf.advance(4);
        let frame = buf.split_to(frame_len as usize);
        Self::decode_frame(&frame).map(Some)
    }
}
