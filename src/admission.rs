//! Admission check: two-phase test-and-decrement against a [`Bucket`].
//!
//! 1. Fast path: read `remaining` without the lock and deny at zero. The read may
//!    be stale, which can only delay the first admission after a refill.
//! 2. Slow path: take the bucket's write lock, re-check, decrement.
//!
//! Between two refills the number of [`Decision::Allowed`] results never exceeds
//! the bucket's capacity, whatever the number of concurrent callers.

use crate::bucket::Bucket;
use std::sync::Arc;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Requests left in the current window after this one.
        remaining: u64,
    },
    /// The bucket is exhausted for the current window.
    Denied,
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Helper to check if denied.
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Denied)
    }
}

/// Anything that can answer "may this request proceed?" immediately.
///
/// The gate only depends on this trait, so it can be wired to a
/// [`crate::RateLimiter`], a bare [`Bucket`], or a stub in tests.
pub trait AdmissionControl: Send + Sync {
    /// Consume one admission if any is left in the current window.
    fn try_acquire(&self) -> Decision;
}

impl Bucket {
    /// Consume one admission if any is left in the current window.
    pub fn try_acquire(&self) -> Decision {
        if self.peek_remaining() == 0 {
            tracing::trace!("rate limit exceeded (fast path)");
            return Decision::Denied;
        }
        match self.take_one() {
            Some(remaining) => {
                tracing::trace!(remaining, "request admitted");
                Decision::Allowed { remaining }
            }
            None => {
                tracing::trace!("rate limit exceeded (lost race for last slot)");
                Decision::Denied
            }
        }
    }
}

impl AdmissionControl for Bucket {
    fn try_acquire(&self) -> Decision {
        Bucket::try_acquire(self)
    }
}

impl<A> AdmissionControl for Arc<A>
where
    A: AdmissionControl + ?Sized,
{
    fn try_acquire(&self) -> Decision {
        (**self).try_acquire()
    }
}
