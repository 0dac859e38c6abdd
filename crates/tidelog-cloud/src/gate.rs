//! Gate - Counted In-Flight Operation Guard
//!
//! Every async entry point of a remote segment holds a `GateGuard` for its
//! duration. `close()` flips the gate shut - refusing new entries - and then
//! waits for the in-flight count to drain to zero, so the segment's retry
//! context and abort source are never torn down under a live operation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct GateInner {
    count: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

/// Tracks in-flight operations; `close()` waits for them to finish
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight operation. Fails with `Stopped` once the gate
    /// has been closed.
    pub fn enter(&self) -> Result<GateGuard> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        // Re-check: close() may have flipped between the load and the add.
        // Dropping the guard undoes the increment and wakes a waiting close.
        if self.inner.closed.load(Ordering::Acquire) {
            drop(GateGuard {
                inner: self.inner.clone(),
            });
            return Err(Error::Stopped);
        }
        Ok(GateGuard {
            inner: self.inner.clone(),
        })
    }

    /// Refuse new entries and wait for in-flight operations to drain.
    /// Idempotent; concurrent and repeated calls all wait for the drain.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}

/// Releases the gate's in-flight count on drop
#[derive(Debug)]
pub struct GateGuard {
    inner: Arc<GateInner>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}
