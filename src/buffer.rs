//! Reference-counted payload buffers
//!
//! One UART read becomes one [`Buffer`]. Every queue that receives it holds
//! its own handle; cloning a handle is a *take*, dropping one is a *release*.
//! The payload is freed, and its bytes returned to the [`BufferPool`] budget,
//! when the last handle goes away, whichever thread that happens on.

use log::trace;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Allocator for [`Buffer`]s with a cap on live payload bytes
pub struct BufferPool {
    limit: usize,
    live_bytes: AtomicUsize,
    allocations: AtomicU64,
    takes: AtomicU64,
    releases: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of pool accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently held by live buffers
    pub live_bytes: usize,
    /// Buffers created
    pub allocations: u64,
    /// References taken, including each buffer's initial one
    pub takes: u64,
    /// References released
    pub releases: u64,
    /// Allocations refused because of the budget
    pub rejected: u64,
}

impl PoolStats {
    /// References not yet released
    pub fn outstanding(&self) -> u64 {
        self.takes - self.releases
    }
}

impl BufferPool {
    /// Create a pool that never holds more than `limit` payload bytes at once
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            live_bytes: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            takes: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Copy `data` into a new buffer owned by the caller.
    ///
    /// Fails with [`Error::ResourceExhausted`] without allocating if the
    /// payload does not fit in what is left of the budget.
    pub fn alloc(self: &Arc<Self>, data: &[u8]) -> Result<Buffer> {
        let len = data.len();
        if !self.try_reserve(len) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ResourceExhausted(format!(
                "{} byte payload exceeds in-flight budget ({} of {} bytes in use)",
                len,
                self.live_bytes.load(Ordering::Relaxed),
                self.limit
            )));
        }

        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.takes.fetch_add(1, Ordering::Relaxed);
        Ok(Buffer {
            inner: Arc::new(Payload {
                bytes: data.into(),
                pool: Arc::clone(self),
            }),
        })
    }

    fn try_reserve(&self, n: usize) -> bool {
        loop {
            let cur = self.live_bytes.load(Ordering::Relaxed);
            let new = match cur.checked_add(n) {
                Some(new) if new <= self.limit => new,
                _ => return false,
            };
            if self
                .live_bytes
                .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Configured byte budget
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Relaxed),
            takes: self.takes.load(Ordering::Acquire),
            releases: self.releases.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct Payload {
    bytes: Box<[u8]>,
    pool: Arc<BufferPool>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.pool
            .live_bytes
            .fetch_sub(self.bytes.len(), Ordering::AcqRel);
        trace!("Freed {} byte buffer", self.bytes.len());
    }
}

/// Immutable shared payload; see the module docs for the ownership rules
pub struct Buffer {
    inner: Arc<Payload>,
}

impl Buffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Live handles to this payload
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.inner.pool.takes.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.inner.pool.releases.fetch_add(1, Ordering::AcqRel);
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}
