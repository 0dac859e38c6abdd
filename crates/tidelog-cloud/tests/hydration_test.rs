//! Hydration integration tests: single-flight downloads, retry and failure
//! classification, stop semantics, offset translation, and end-to-end remote
//! reads of a segment round-tripped through the in-memory blob store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use object_store::memory::InMemory;
use tidelog_cloud::{
    BlobResult, BlobStore, BlobStoreError, CacheService, DownloadErrorKind, Error, Manifest,
    ObjectStoreAdapter, RemoteReadConfig, RemoteSegment, RemoteSegmentBatchReader, RetryChain,
    RetryPolicy, SegmentMeta, MAX_INDEX_ERROR_BYTES,
};
use tidelog_core::RecordBatch;

const BUCKET: &str = "log-data";
const KEY: &str = "topic/0/100-1.log";

fn encode_all(batches: &[RecordBatch]) -> Bytes {
    let mut buf = BytesMut::new();
    for batch in batches {
        batch.encode(&mut buf);
    }
    buf.freeze()
}

fn sample_batches() -> Vec<RecordBatch> {
    let mut batches = Vec::new();
    let mut next = 100u64;
    for i in 0..10u64 {
        let batch = RecordBatch::data(next, 5, 10_000 + i, Bytes::from(vec![b'v'; 200]));
        next = batch.last_offset() + 1;
        batches.push(batch);
    }
    batches
}

fn manifest_for(batches: &[RecordBatch], size_bytes: u64) -> Manifest {
    Manifest::from_segments([SegmentMeta {
        key: KEY.to_string(),
        base_offset: batches.first().map(|b| b.base_offset).unwrap_or(100),
        max_offset: batches.last().map(|b| b.last_offset()).unwrap_or(100),
        delta_offset: 3,
        term: 1,
        size_bytes,
    }])
}

async fn in_memory_store_with(data: Bytes) -> Arc<dyn BlobStore> {
    let adapter = ObjectStoreAdapter::new().with_bucket(BUCKET, Arc::new(InMemory::new()));
    adapter.put_object(BUCKET, KEY, data).await.unwrap();
    Arc::new(adapter)
}

fn fast_retry() -> RetryChain {
    RetryChain::new(RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
    })
}

/// Counts `get_object` calls and injects latency/failures around an inner
/// store.
struct InstrumentedStore {
    inner: Arc<dyn BlobStore>,
    gets: AtomicUsize,
    latency: Duration,
    transient_failures: AtomicUsize,
}

impl InstrumentedStore {
    fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            latency: Duration::ZERO,
            transient_failures: AtomicUsize::new(0),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::Release);
        self
    }

    fn get_count(&self) -> usize {
        self.gets.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BlobStore for InstrumentedStore {
    async fn get_object(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        self.gets.fetch_add(1, Ordering::AcqRel);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let remaining = self.transient_failures.load(Ordering::Acquire);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::Release);
            return Err(BlobStoreError::Transient("injected failure".to_string()));
        }
        self.inner.get_object(bucket, key).await
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> BlobResult<()> {
        self.inner.put_object(bucket, key, data).await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> BlobResult<Vec<String>> {
        self.inner.list_objects(bucket, prefix).await
    }
}

#[tokio::test]
async fn test_hydrate_then_stream() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment =
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();

    let path = segment.hydrate().await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), data.as_ref());

    // Second hydrate is a cache hit
    assert_eq!(segment.hydrate().await.unwrap(), path);

    // A data stream shares the hydrated file
    use tokio::io::AsyncReadExt;
    let mut stream = segment.data_stream(0).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, data.as_ref());
}

#[tokio::test]
async fn test_concurrent_hydration_downloads_once() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let inner = in_memory_store_with(data.clone()).await;
    let store = Arc::new(
        InstrumentedStore::new(inner).with_latency(Duration::from_millis(50)),
    );

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment = Arc::new(
        RemoteSegment::new(store.clone(), cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let segment = segment.clone();
        tasks.push(tokio::spawn(async move { segment.hydrate().await }));
    }

    let mut paths = Vec::new();
    for task in tasks {
        paths.push(task.await.unwrap().unwrap());
    }

    // Exactly one download; every caller observed the same outcome
    assert_eq!(store.get_count(), 1);
    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let inner = in_memory_store_with(data.clone()).await;
    let store = Arc::new(InstrumentedStore::new(inner).with_transient_failures(2));

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment =
        RemoteSegment::new(store.clone(), cache, BUCKET, &manifest, 100, &rtc).unwrap();

    let path = segment.hydrate().await.unwrap();
    assert!(path.exists());
    // Two failures + one success
    assert_eq!(store.get_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_timed_out() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let inner = in_memory_store_with(data).await;
    // More failures than the policy's retry budget (3 retries = 4 attempts)
    let store = Arc::new(InstrumentedStore::new(inner).with_transient_failures(10));

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&sample_batches(), 0);
    let rtc = fast_retry();

    let segment =
        RemoteSegment::new(store.clone(), cache, BUCKET, &manifest, 100, &rtc).unwrap();

    match segment.hydrate().await {
        Err(Error::Download { kind, .. }) => {
            assert_eq!(kind, DownloadErrorKind::TimedOut);
            assert!(!kind.is_permanent());
        }
        other => panic!("expected TimedOut, got {:?}", other.map(|_| ())),
    }
    assert_eq!(store.get_count(), 4);
}

#[tokio::test]
async fn test_missing_object_is_permanent() {
    let adapter = ObjectStoreAdapter::new().with_bucket(BUCKET, Arc::new(InMemory::new()));
    let store: Arc<dyn BlobStore> = Arc::new(adapter);

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&sample_batches(), 0);
    let rtc = fast_retry();

    let segment = RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();

    match segment.hydrate().await {
        Err(Error::Download { kind, path }) => {
            assert_eq!(kind, DownloadErrorKind::NotFound);
            assert!(kind.is_permanent());
            assert!(!path.exists());
        }
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_corrupt_tail_past_budget_is_index_corruption() {
    let batches = sample_batches();
    let mut raw = BytesMut::from(&encode_all(&batches)[..]);
    raw.extend_from_slice(&vec![0xABu8; MAX_INDEX_ERROR_BYTES + 4096]);
    let store = in_memory_store_with(raw.freeze()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, 0);
    let rtc = fast_retry();

    let segment = RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();

    match segment.hydrate().await {
        Err(Error::Download { kind, .. }) => {
            assert_eq!(kind, DownloadErrorKind::IndexCorruption);
            assert!(kind.is_permanent());
        }
        other => panic!("expected IndexCorruption, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_short_corrupt_tail_is_tolerated() {
    let batches = sample_batches();
    let full = encode_all(&batches);
    // Cut into the final frame: a small torn tail, as an interrupted upload
    // would leave
    let cut = full.slice(..full.len() - 17);
    let store = in_memory_store_with(cut.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, cut.len() as u64);
    let rtc = fast_retry();

    let segment = RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();
    assert!(segment.hydrate().await.is_ok());
}

#[tokio::test]
async fn test_stop_fails_fast_afterwards() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, 0);
    let rtc = fast_retry();

    let segment = RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();
    segment.hydrate().await.unwrap();

    segment.stop().await;
    assert!(matches!(segment.hydrate().await, Err(Error::Stopped)));
    assert!(matches!(segment.data_stream(0).await, Err(Error::Stopped)));

    // stop() is idempotent
    segment.stop().await;
}

#[tokio::test]
async fn test_cancellation_preempts_retries() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let inner = in_memory_store_with(data).await;
    let store = Arc::new(InstrumentedStore::new(inner).with_transient_failures(usize::MAX));

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&sample_batches(), 0);
    // Long backoff: cancellation must cut it short
    let rtc = RetryChain::new(RetryPolicy {
        max_retries: 5,
        initial_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(60),
        backoff_multiplier: 2.0,
    });

    let segment = Arc::new(
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );

    let hydration = {
        let segment = segment.clone();
        tokio::spawn(async move { segment.hydrate().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    rtc.cancel();

    match tokio::time::timeout(Duration::from_secs(5), hydration)
        .await
        .expect("cancellation must preempt the queued retry")
        .unwrap()
    {
        Err(Error::Download { kind, .. }) => assert_eq!(kind, DownloadErrorKind::Aborted),
        other => panic!("expected Aborted, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_offset_translation() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, 0);
    let rtc = fast_retry();

    let segment = RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap();

    assert_eq!(segment.base_log_offset(), 100);
    assert_eq!(segment.delta_offset(), 3);
    assert_eq!(segment.base_data_offset(), 97);
    assert_eq!(segment.max_log_offset(), 149);
    assert_eq!(segment.term(), 1);
}

#[tokio::test]
async fn test_read_some_end_to_end() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment = Arc::new(
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );
    let mut reader = RemoteSegmentBatchReader::new(
        segment.clone(),
        RemoteReadConfig::new(100, segment.max_log_offset()),
    );

    let mut decoded = Vec::new();
    loop {
        let some = reader.read_some(Duration::from_secs(5)).await.unwrap();
        if some.is_empty() {
            assert!(reader.is_done());
            break;
        }
        decoded.extend(some);
    }
    assert_eq!(decoded, batches);

    reader.stop().await;
}

#[tokio::test]
async fn test_read_some_drops_batches_below_start() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment = Arc::new(
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );

    // Start mid-segment: the first three batches (base offsets 100, 105,
    // 110) are dropped without counting against the budget
    let mut reader = RemoteSegmentBatchReader::new(
        segment.clone(),
        RemoteReadConfig::new(115, segment.max_log_offset()),
    );

    let mut decoded = Vec::new();
    loop {
        let some = reader.read_some(Duration::from_secs(5)).await.unwrap();
        if some.is_empty() {
            break;
        }
        decoded.extend(some);
    }

    assert_eq!(decoded.first().unwrap().base_offset, 115);
    assert_eq!(decoded.len(), 7);

    // Dropped batches never touched the byte budget
    let produced: usize = decoded.iter().map(|b| b.encoded_len()).sum();
    assert_eq!(reader.bytes_produced(), produced);
}

#[tokio::test]
async fn test_read_some_respects_per_call_budget() {
    let batches = sample_batches();
    let data = encode_all(&batches);
    let store = in_memory_store_with(data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, data.len() as u64);
    let rtc = fast_retry();

    let segment = Arc::new(
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );
    let one_batch = batches[0].encoded_len();
    let mut config = RemoteReadConfig::new(100, segment.max_log_offset());
    config.max_bytes_per_read = one_batch;
    let mut reader = RemoteSegmentBatchReader::new(segment, config);

    // Budget of one batch per call: ten calls drain the segment
    let mut calls = 0;
    let mut total = 0;
    loop {
        let some = reader.read_some(Duration::from_secs(5)).await.unwrap();
        if some.is_empty() {
            break;
        }
        assert_eq!(some.len(), 1);
        total += some.len();
        calls += 1;
    }
    assert_eq!(total, 10);
    assert_eq!(calls, 10);
}

#[tokio::test]
async fn test_read_some_fails_on_torn_frame_without_partial_data() {
    let batches = sample_batches();
    let full = encode_all(&batches);
    // Flip a byte inside the fourth frame's payload: the prefix parses, the
    // damaged frame must poison the session
    let mut raw = BytesMut::from(&full[..]);
    let damage_at: usize = batches[..3].iter().map(|b| b.encoded_len()).sum::<usize>() + 40;
    raw[damage_at] ^= 0xFF;
    let store = in_memory_store_with(raw.freeze()).await;

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheService::new(dir.path().join("cache"), 1 << 30).unwrap());
    let manifest = manifest_for(&batches, full.len() as u64);
    let rtc = fast_retry();

    let segment = Arc::new(
        RemoteSegment::new(store, cache, BUCKET, &manifest, 100, &rtc).unwrap(),
    );
    let mut config = RemoteReadConfig::new(100, segment.max_log_offset());
    // Big budget so the damaged frame is hit within one call
    config.max_bytes_per_read = 1 << 20;
    let mut reader = RemoteSegmentBatchReader::new(segment, config);

    match reader.read_some(Duration::from_secs(5)).await {
        Err(Error::Parse(_)) => {}
        other => panic!("expected Parse error, got {:?}", other.map(|v| v.len())),
    }
    assert!(reader.is_done());

    // The session is poisoned; later calls return cleanly empty
    assert!(reader.read_some(Duration::from_secs(1)).await.unwrap().is_empty());
}
