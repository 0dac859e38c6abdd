//! Local Cache Service with Single-Flight Reservations
//!
//! Disk-based LRU cache for segment files downloaded from the blob store,
//! extended with the reservation protocol the cloud tier needs: at most one
//! download per key, no matter how many readers want it at once.
//!
//! ## Why Caching?
//!
//! Object stores answer in tens to hundreds of milliseconds per GET and bill
//! for every request. A hydrated segment on local disk answers in well under
//! a millisecond, and sequential consumers hit the same segment over and
//! over.
//!
//! ## Single-Flight Reservations
//!
//! ```text
//! reader A ── reserve_or_get(key) ──→ Miss(reservation)   ← downloads
//! reader B ── reserve_or_get(key) ──→ waits on the same key
//! reader C ── reserve_or_get(key) ──→ waits on the same key
//!
//! A: reservation.put(bytes)  →  B and C wake with Hit(path)
//! A: reservation.fail(kind)  →  B and C wake with the same failure
//! ```
//!
//! Each in-flight key owns a `watch` channel; waiters observe exactly the
//! outcome the downloader recorded. A failed or abandoned reservation leaves
//! the key cold, so the *next* requester starts a fresh download rather than
//! inheriting a stale failure.
//!
//! ## Crash Consistency
//!
//! `put` writes through a temp file and renames it into place: concurrent
//! readers see either no file or a byte-complete file, never a partial
//! download.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{DownloadErrorKind, Error, Result};

/// Outcome of a cache lookup
pub enum CacheLookup {
    /// The segment is hydrated at this path
    Hit(PathBuf),
    /// The segment is cold; the caller holds the only download slot
    Miss(CacheReservation),
}

#[derive(Debug, Clone)]
enum ReservationState {
    Pending,
    Ready(PathBuf),
    Failed(DownloadErrorKind),
}

struct CacheState {
    /// cache key -> file size, in recency order
    entries: LruCache<String, u64>,

    /// Total bytes of cached files
    total_bytes: u64,

    /// One watch per in-flight download
    inflight: HashMap<String, watch::Receiver<ReservationState>>,
}

struct CacheShared {
    dir: PathBuf,
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl CacheShared {
    fn entry_path(&self, key: &str) -> PathBuf {
        // Object keys carry '/'s; flatten them into one cache file name
        self.dir.join(format!("{}.seg", key.replace('/', "_")))
    }

    /// Evict LRU entries until `needed` more bytes fit the budget.
    async fn evict_for(&self, state: &mut CacheState, needed: u64) {
        while state.total_bytes + needed > self.max_bytes {
            match state.entries.pop_lru() {
                Some((key, size)) => {
                    let path = self.entry_path(&key);
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(cache_key = %key, error = %e, "failed to delete cached segment");
                        }
                    }
                    state.total_bytes = state.total_bytes.saturating_sub(size);
                    debug!(cache_key = %key, size, "evicted from cache");
                }
                None => {
                    warn!(
                        needed,
                        max_size = self.max_bytes,
                        "segment larger than cache budget"
                    );
                    break;
                }
            }
        }
    }
}

/// Disk-backed LRU cache of hydrated segments
pub struct CacheService {
    shared: Arc<CacheShared>,
}

impl CacheService {
    /// Create the cache rooted at `dir` with a byte budget.
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            shared: Arc::new(CacheShared {
                dir,
                max_bytes,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    total_bytes: 0,
                    inflight: HashMap::new(),
                }),
            }),
        })
    }

    /// Resolve `key` to a hydrated path, a fresh reservation, or - when a
    /// download for the key is already in flight - that download's outcome.
    pub async fn reserve_or_get(&self, key: &str) -> Result<CacheLookup> {
        let mut rx = {
            let mut state = self.shared.state.lock().await;

            if state.entries.get(key).is_some() {
                let path = self.shared.entry_path(key);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    debug!(cache_key = %key, "cache hit");
                    return Ok(CacheLookup::Hit(path));
                }
                // File vanished underneath us; treat as cold
                if let Some(size) = state.entries.pop(key) {
                    state.total_bytes = state.total_bytes.saturating_sub(size);
                }
            }

            // A finished download leaves its watch behind; the key is cold
            // again and this caller takes a fresh slot
            let stale = state
                .inflight
                .get(key)
                .map(|rx| !matches!(*rx.borrow(), ReservationState::Pending))
                .unwrap_or(false);
            if stale {
                state.inflight.remove(key);
            }

            if let Some(rx) = state.inflight.get(key) {
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(ReservationState::Pending);
                state.inflight.insert(key.to_string(), rx);
                debug!(cache_key = %key, "reserved download slot");
                return Ok(CacheLookup::Miss(CacheReservation {
                    key: key.to_string(),
                    shared: self.shared.clone(),
                    tx,
                    completed: false,
                }));
            }
        };

        debug!(cache_key = %key, "awaiting in-flight download");
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                ReservationState::Pending => {
                    if rx.changed().await.is_err() {
                        return Err(Error::Download {
                            kind: DownloadErrorKind::Aborted,
                            path: self.shared.entry_path(key),
                        });
                    }
                }
                ReservationState::Ready(path) => return Ok(CacheLookup::Hit(path)),
                ReservationState::Failed(kind) => {
                    return Err(Error::Download {
                        kind,
                        path: self.shared.entry_path(key),
                    })
                }
            }
        }
    }

    /// Drop `key` from the cache and delete its file.
    pub async fn evict(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if let Some(size) = state.entries.pop(key) {
            state.total_bytes = state.total_bytes.saturating_sub(size);
            let path = self.shared.entry_path(key);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(cache_key = %key, error = %e, "failed to delete cached segment");
                }
            }
            debug!(cache_key = %key, size, "evicted from cache");
        }
        Ok(())
    }

    /// Cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock().await;
        CacheStats {
            current_size: state.total_bytes,
            max_size: self.shared.max_bytes,
            entry_count: state.entries.len(),
            in_flight: state.inflight.len(),
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub current_size: u64,
    pub max_size: u64,
    pub entry_count: usize,
    pub in_flight: usize,
}

/// The single download slot for a cold key
pub struct CacheReservation {
    key: String,
    shared: Arc<CacheShared>,
    tx: watch::Sender<ReservationState>,
    completed: bool,
}

impl CacheReservation {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path the segment will occupy once hydrated.
    pub fn path(&self) -> PathBuf {
        self.shared.entry_path(&self.key)
    }

    /// Complete the reservation with downloaded bytes. The file becomes
    /// visible atomically; every waiter wakes with a `Hit`.
    pub async fn put(mut self, data: Bytes) -> Result<PathBuf> {
        let path = self.path();
        let tmp = path.with_extension("part");
        let size = data.len() as u64;

        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            self.complete(ReservationState::Failed(DownloadErrorKind::BucketError))
                .await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            self.complete(ReservationState::Failed(DownloadErrorKind::BucketError))
                .await;
            return Err(e.into());
        }

        {
            let mut state = self.shared.state.lock().await;
            self.shared.evict_for(&mut state, size).await;
            state.entries.put(self.key.clone(), size);
            state.total_bytes += size;
        }

        info!(cache_key = %self.key, size, "cached hydrated segment");
        self.complete(ReservationState::Ready(path.clone())).await;
        Ok(path)
    }

    /// Record a failed download; every waiter wakes with the same class.
    pub async fn fail(mut self, kind: DownloadErrorKind) {
        debug!(cache_key = %self.key, kind = %kind, "download reservation failed");
        self.complete(ReservationState::Failed(kind)).await;
    }

    async fn complete(&mut self, outcome: ReservationState) {
        if self.completed {
            return;
        }
        self.completed = true;
        let mut state = self.shared.state.lock().await;
        state.inflight.remove(&self.key);
        drop(state);
        let _ = self.tx.send_replace(outcome);
    }
}

impl Drop for CacheReservation {
    fn drop(&mut self) {
        if !self.completed {
            // Abandoned mid-download (cancellation, panic): waiters learn the
            // outcome; the stale inflight watch is swept by the next caller
            self.completed = true;
            let _ = self
                .tx
                .send_replace(ReservationState::Failed(DownloadErrorKind::Aborted));
        }
    }
}
