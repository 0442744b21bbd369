//! Shared request bucket.
//!
//! A [`Bucket`] holds the number of requests still admissible in the current
//! window. Every write to `remaining` happens while holding the bucket's write
//! lock; the only lock-free access is the admission fast path in
//! [`crate::admission`], which can observe a stale value but never writes.
//!
//! Invariants:
//! - `0 <= remaining <= capacity` at all times.
//! - `capacity` never changes after construction.
//! - [`Bucket::refill`] sets `remaining` back to exactly `capacity`, whatever it was.

use crate::sync::{AtomicU64, Mutex, MutexGuard, Ordering};

/// Point-in-time view of a bucket.
///
/// Non-authoritative: concurrent admissions or refills may have changed the
/// bucket by the time the caller looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    /// Requests still admissible in the current window.
    pub remaining: u64,
    /// Requests admissible per window.
    pub capacity: u64,
}

/// Fixed-capacity request counter shared by every request-handling task.
#[derive(Debug)]
pub struct Bucket {
    remaining: AtomicU64,
    capacity: u64,
    // Guards all writes to `remaining`. The flag records whether the bucket has been filled.
    write_lock: Mutex<bool>,
}

impl Bucket {
    /// Create an empty, uninitialized bucket.
    ///
    /// Until [`Bucket::initialize`] (or a refill) runs, every admission is denied.
    pub fn new(capacity: u64) -> Self {
        Self { remaining: AtomicU64::new(0), capacity, write_lock: Mutex::new(false) }
    }

    /// Create a bucket that starts full.
    pub fn full(capacity: u64) -> Self {
        let bucket = Self::new(capacity);
        bucket.initialize();
        bucket
    }

    /// Fill the bucket to capacity, once.
    ///
    /// Safe to race with admissions and with other callers: only the first call
    /// performs the write and returns `true`; later calls are no-ops.
    pub fn initialize(&self) -> bool {
        let mut initialized = self.lock();
        if *initialized {
            return false;
        }
        self.remaining.store(self.capacity, Ordering::Release);
        *initialized = true;
        tracing::info!(capacity = self.capacity, "initialized rate limiter bucket");
        true
    }

    /// Reset `remaining` to `capacity` unconditionally, returning the previous value.
    pub fn refill(&self) -> u64 {
        let mut initialized = self.lock();
        let previous = self.remaining.swap(self.capacity, Ordering::AcqRel);
        *initialized = true;
        previous
    }

    /// Requests admissible per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Non-authoritative view of the bucket.
    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot { remaining: self.remaining.load(Ordering::Acquire), capacity: self.capacity }
    }

    /// Lock-free read used by the admission fast path. May be stale.
    pub(crate) fn peek_remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Take one request under the write lock.
    ///
    /// Returns the value left after the decrement, or `None` if the bucket was
    /// already empty when the lock was acquired.
    pub(crate) fn take_one(&self) -> Option<u64> {
        let _guard = self.lock();
        let current = self.remaining.load(Ordering::Acquire);
        if current == 0 {
            return None;
        }
        let left = current - 1;
        self.remaining.store(left, Ordering::Release);
        Some(left)
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // The guarded state is a plain counter that every writer leaves consistent,
        // so a panic elsewhere while holding the lock cannot corrupt it.
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter bucket lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }
}
