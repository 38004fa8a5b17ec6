//! Memory accounting for tensor buffers.
//!
//! The engine tracks the total number of bytes held in block buffers and
//! enforces a user-set ceiling: an allocation that would exceed it is a
//! resource error carrying a human-readable summary (bytes requested,
//! ceiling, current usage). Peak usage is reported at shutdown.
//!
//! Accounting is attached to the buffers themselves: a [`TrackedVec`] knows
//! its byte count and returns it to the counter when dropped, so `free`
//! never needs a size table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::arith::Scalar;
use crate::error::{EngineError, Result};

#[derive(Debug)]
struct Counters {
    used: AtomicUsize,
    peak: AtomicUsize,
    limit: AtomicUsize,
}

/// Shared byte counter with ceiling enforcement.
#[derive(Clone, Debug)]
pub struct MemoryTracker {
    inner: Arc<Counters>,
}

impl MemoryTracker {
    /// Create a tracker with the given ceiling in bytes.
    pub fn new(limit_bytes: usize) -> Self {
        MemoryTracker {
            inner: Arc::new(Counters {
                used: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                limit: AtomicUsize::new(limit_bytes),
            }),
        }
    }

    /// Change the ceiling.
    pub fn set_limit(&self, limit_bytes: usize) {
        self.inner.limit.store(limit_bytes, Ordering::Relaxed);
    }

    /// Bytes currently in use.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Highest usage observed so far.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }

    /// Allocate a zero-initialized buffer of `n` elements, charging its byte
    /// count against the ceiling.
    pub fn alloc_zeroed<T: Scalar>(&self, n: usize) -> Result<TrackedVec<T>> {
        let bytes = n * std::mem::size_of::<T>();
        self.charge(bytes)?;
        Ok(TrackedVec {
            data: vec![T::zero(); n],
            bytes,
            tracker: self.clone(),
        })
    }

    /// Wrap an existing vector (e.g. a buffer read back from disk) into a
    /// tracked buffer.
    pub fn adopt<T: Scalar>(&self, data: Vec<T>) -> Result<TrackedVec<T>> {
        let bytes = data.len() * std::mem::size_of::<T>();
        self.charge(bytes)?;
        Ok(TrackedVec {
            data,
            bytes,
            tracker: self.clone(),
        })
    }

    fn charge(&self, bytes: usize) -> Result<()> {
        let limit = self.inner.limit.load(Ordering::Relaxed);
        let used = self.inner.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if used > limit {
            self.inner.used.fetch_sub(bytes, Ordering::Relaxed);
            return Err(EngineError::Resource(format!(
                "cannot allocate {bytes} bytes: {} bytes in use, ceiling {limit} bytes",
                used - bytes
            )));
        }
        self.inner.peak.fetch_max(used, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        self.inner.used.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Log current and peak usage.
    pub fn report(&self) {
        let to_gb = 1.0 / (1024.0 * 1024.0 * 1024.0);
        tracing::info!(
            used_bytes = self.used(),
            peak_bytes = self.peak(),
            used_gb = self.used() as f64 * to_gb,
            peak_gb = self.peak() as f64 * to_gb,
            "memory usage"
        );
    }
}

impl Default for MemoryTracker {
    /// 1 GiB default ceiling.
    fn default() -> Self {
        MemoryTracker::new(1024 * 1024 * 1024)
    }
}

/// A heap buffer whose byte count is charged against a [`MemoryTracker`]
/// for its entire lifetime.
#[derive(Debug)]
pub struct TrackedVec<T: Scalar> {
    data: Vec<T>,
    bytes: usize,
    tracker: MemoryTracker,
}

impl<T: Scalar> TrackedVec<T> {
    /// Element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the tracked buffer, returning the raw vector and releasing
    /// the charge.
    pub fn into_inner(mut self) -> Vec<T> {
        self.tracker.release(self.bytes);
        self.bytes = 0;
        std::mem::take(&mut self.data)
    }
}

impl<T: Scalar> std::ops::Deref for TrackedVec<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T: Scalar> std::ops::DerefMut for TrackedVec<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Scalar> Drop for TrackedVec<T> {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

impl<T: Scalar> Clone for TrackedVec<T> {
    fn clone(&self) -> Self {
        // The clone charges its own bytes; going over the ceiling here
        // aborts like any other oversized allocation would.
        self.tracker
            .adopt(self.data.clone())
            .expect("memory ceiling exceeded while cloning a buffer")
    }
}
