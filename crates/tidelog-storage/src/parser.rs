//! Streaming Batch Parser
//!
//! Incrementally decodes batch frames from any byte stream - a local segment
//! stream, or a hydrated remote segment file. Bytes are pulled only as frames
//! are requested, so a reader that stops early never pays for the rest of the
//! segment.
//!
//! End-of-input handling distinguishes two cases:
//! - EOF exactly on a frame boundary is a clean end (`Ok(None)`),
//! - EOF inside a frame is a `TruncatedBatch` error - the tail of a segment
//!   cut short by an unclean shutdown or a partial download.
//!
//! Any error latches the parser into the done state; further calls return
//! `Ok(None)` rather than re-reading a stream in an unknown position.

use tidelog_core::batch::{FRAME_HEADER_SIZE, MAX_FRAME_BYTES};
use tidelog_core::{Error, RecordBatch, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Pull-based decoder of batch frames from a byte stream
pub struct BatchStreamParser<R> {
    reader: R,
    bytes_consumed: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> BatchStreamParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            bytes_consumed: 0,
            done: false,
        }
    }

    /// Bytes consumed from the stream so far; at a frame boundary this is the
    /// physical offset of the next batch.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode the next batch, or `Ok(None)` at a clean end of stream.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.done {
            return Ok(None);
        }
        match self.read_frame().await {
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Ok(some) => Ok(some),
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Option<RecordBatch>> {
        // Length prefix, read byte-wise so EOF on the boundary is clean
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::TruncatedBatch {
                    expected: len_buf.len(),
                    actual: filled,
                });
            }
            filled += n;
        }

        let frame_len = u32::from_be_bytes(len_buf) as usize;
        if frame_len < FRAME_HEADER_SIZE || frame_len > MAX_FRAME_BYTES {
            return Err(Error::InvalidFrameLength(frame_len as u32));
        }

        let mut frame = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame.len() {
            let n = self.reader.read(&mut frame[filled..]).await?;
            if n == 0 {
                return Err(Error::TruncatedBatch {
                    expected: frame_len,
                    actual: filled,
                });
            }
            filled += n;
        }

        self.bytes_consumed += 4 + frame_len as u64;
        RecordBatch::decode_frame(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    fn encode_all(batches: &[RecordBatch]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for batch in batches {
            batch.encode(&mut buf);
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_parse_stream_of_batches() {
        let batches = vec![
            RecordBatch::data(0, 3, 1000, Bytes::from("aaa")),
            RecordBatch::data(3, 2, 1001, Bytes::from("bb")),
            RecordBatch::data(5, 1, 1002, Bytes::from("c")),
        ];
        let raw = encode_all(&batches);

        let mut parser = BatchStreamParser::new(raw.as_slice());
        for expected in &batches {
            let got = parser.next_batch().await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert!(parser.next_batch().await.unwrap().is_none());
        assert!(parser.is_done());
        assert_eq!(parser.bytes_consumed(), raw.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_end() {
        let mut parser = BatchStreamParser::new(&[][..]);
        assert!(parser.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bytes_consumed_tracks_frame_boundaries() {
        let a = RecordBatch::data(0, 1, 0, Bytes::from("aa"));
        let b = RecordBatch::data(1, 1, 0, Bytes::from("bb"));
        let raw = encode_all(&[a.clone(), b]);

        let mut parser = BatchStreamParser::new(raw.as_slice());
        parser.next_batch().await.unwrap().unwrap();
        assert_eq!(parser.bytes_consumed(), a.encoded_len() as u64);
    }

    #[tokio::test]
    async fn test_truncated_tail_is_an_error() {
        let batch = RecordBatch::data(0, 5, 1000, Bytes::from("payload"));
        let raw = batch.to_bytes();
        let cut = &raw[..raw.len() - 2];

        let mut parser = BatchStreamParser::new(cut);
        match parser.next_batch().await {
            Err(Error::TruncatedBatch { .. }) => {}
            other => panic!("expected TruncatedBatch, got {:?}", other),
        }
        // Latched: subsequent calls are a clean no-op
        assert!(parser.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_length_prefix_is_an_error() {
        let mut parser = BatchStreamParser::new(&[0u8, 0][..]);
        match parser.next_batch().await {
            Err(Error::TruncatedBatch { expected: 4, actual: 2 }) => {}
            other => panic!("expected TruncatedBatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_frame_surfaces_crc_error() {
        let batch = RecordBatch::data(0, 5, 1000, Bytes::from("payload"));
        let mut raw = batch.to_bytes().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let mut parser = BatchStreamParser::new(raw.as_slice());
        match parser.next_batch().await {
            Err(Error::CrcMismatch) => {}
            other => panic!("expected CrcMismatch, got {:?}", other),
        }
    }
}
