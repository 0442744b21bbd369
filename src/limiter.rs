//! The rate limiter service object.
//!
//! A [`RateLimiter`] owns the shared [`Bucket`] and the refill task. It is built
//! once at startup and handed to the request gate; clones share the same bucket.
//!
//! ```rust
//! use tollgate::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimiterConfig::new(3, Duration::from_secs(60)).unwrap();
//!     let limiter = RateLimiter::start(config).unwrap();
//!
//!     assert!(limiter.try_acquire().is_allowed());
//!     assert_eq!(limiter.snapshot().remaining, 2);
//!
//!     limiter.shutdown().await;
//! }
//! ```

use crate::admission::{AdmissionControl, Decision};
use crate::bucket::{Bucket, BucketSnapshot};
use crate::config::{LimiterSettings, RateLimiterConfig};
use crate::error::StartError;
use crate::refill::{RefillHandle, RefillScheduler};
use crate::telemetry::{NullSink, TelemetrySink};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Fixed-window global rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    bucket: Arc<Bucket>,
    config: RateLimiterConfig,
    refill: Mutex<Option<RefillHandle>>,
}

/// Builder for [`RateLimiter`], used to attach a telemetry sink to the refill task.
#[derive(Debug, Clone)]
pub struct RateLimiterBuilder<T = NullSink> {
    config: RateLimiterConfig,
    sink: T,
}

impl RateLimiter {
    /// Start building a limiter for `config`.
    pub fn builder(config: RateLimiterConfig) -> RateLimiterBuilder<NullSink> {
        RateLimiterBuilder { config, sink: NullSink }
    }

    /// Fill the bucket and start refilling it every window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: RateLimiterConfig) -> Result<Self, StartError> {
        Self::builder(config).start()
    }

    /// Validate raw settings, then [`RateLimiter::start`].
    pub fn from_settings(settings: LimiterSettings) -> Result<Self, StartError> {
        let config = RateLimiterConfig::try_from(settings)?;
        Self::start(config)
    }

    /// Consume one admission if any is left in the current window.
    pub fn try_acquire(&self) -> Decision {
        self.inner.bucket.try_acquire()
    }

    /// Non-authoritative view of the bucket.
    pub fn snapshot(&self) -> BucketSnapshot {
        self.inner.bucket.snapshot()
    }

    /// Configuration the limiter was started with.
    pub fn config(&self) -> RateLimiterConfig {
        self.inner.config
    }

    /// Refills performed since start, or `None` once shut down.
    pub fn refills(&self) -> Option<u64> {
        self.handle().as_ref().map(RefillHandle::firings)
    }

    /// Whether the refill task is still running.
    pub fn is_refilling(&self) -> bool {
        self.handle().as_ref().is_some_and(RefillHandle::is_running)
    }

    /// Stop the refill task and wait for it to exit.
    ///
    /// Admissions keep working against whatever is left in the bucket. Calling
    /// this more than once, or from several clones, is fine.
    pub async fn shutdown(&self) {
        let handle = self.handle().take();
        if let Some(handle) = handle {
            handle.stop().await;
            tracing::info!("rate limiter shut down");
        }
    }

    fn handle(&self) -> std::sync::MutexGuard<'_, Option<RefillHandle>> {
        self.inner.refill.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> RateLimiterBuilder<T> {
    /// Emit refill events into `sink`.
    pub fn sink<U>(self, sink: U) -> RateLimiterBuilder<U> {
        RateLimiterBuilder { config: self.config, sink }
    }
}

impl<T> RateLimiterBuilder<T>
where
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Fill the bucket, then spawn the refill task on the current runtime.
    ///
    /// The bucket is full when this returns, so the first window starts now.
    pub fn start(self) -> Result<RateLimiter, StartError> {
        let capacity = self.config.capacity();
        let window = self.config.window();

        let bucket = Arc::new(Bucket::new(capacity));
        bucket.initialize();
        let handle = RefillScheduler::new(bucket.clone(), window).with_sink(self.sink).spawn()?;

        tracing::info!(capacity, window_ms = window.as_millis() as u64, "rate limiter started");
        Ok(RateLimiter {
            inner: Arc::new(Inner { bucket, config: self.config, refill: Mutex::new(Some(handle)) }),
        })
    }
}

impl AdmissionControl for RateLimiter {
    fn try_acquire(&self) -> Decision {
        RateLimiter::try_acquire(self)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.inner.config)
            .field("bucket", &self.inner.bucket.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::telemetry::{GateEvent, MemorySink};
    use std::time::Duration;

    const WINDOW: Duration = Duration::from_secs(60);

    fn config(capacity: u64) -> RateLimiterConfig {
        RateLimiterConfig::new(capacity, WINDOW).unwrap()
    }

    #[test]
    fn start_outside_runtime_fails() {
        let err = RateLimiter::start(config(3)).unwrap_err();
        assert_eq!(err, StartError::NoRuntime);
    }

    #[tokio::test]
    async fn zero_capacity_settings_fail_before_start() {
        let err = RateLimiter::from_settings(LimiterSettings { max_requests: 0, period_ms: 60_000 })
            .unwrap_err();
        assert_eq!(err, StartError::Config(ConfigError::InvalidCapacity { provided: 0 }));
    }

    #[tokio::test]
    async fn bucket_is_full_when_start_returns() {
        let limiter = RateLimiter::start(config(4)).unwrap();
        assert_eq!(limiter.snapshot(), BucketSnapshot { remaining: 4, capacity: 4 });
        assert_eq!(limiter.config(), config(4));
        assert!(limiter.is_refilling());
        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_per_minute_scenario() {
        let limiter = RateLimiter::start(config(3)).unwrap();

        assert!(limiter.try_acquire().is_allowed());
        assert!(limiter.try_acquire().is_allowed());
        assert!(limiter.try_acquire().is_allowed());
        assert!(limiter.try_acquire().is_denied());

        tokio::time::sleep(WINDOW + Duration::from_millis(1)).await;

        assert_eq!(limiter.refills(), Some(1));
        assert_eq!(limiter.try_acquire(), Decision::Allowed { remaining: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_one_bucket() {
        let limiter = RateLimiter::start(config(2)).unwrap();
        let other = limiter.clone();

        assert!(limiter.try_acquire().is_allowed());
        assert!(other.try_acquire().is_allowed());
        assert!(limiter.try_acquire().is_denied());
        assert!(other.try_acquire().is_denied());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_refills_and_is_idempotent() {
        let limiter = RateLimiter::start(config(1)).unwrap();
        assert!(limiter.try_acquire().is_allowed());

        limiter.shutdown().await;
        limiter.clone().shutdown().await;
        assert!(!limiter.is_refilling());
        assert_eq!(limiter.refills(), None);

        tokio::time::sleep(WINDOW * 3).await;
        assert!(limiter.try_acquire().is_denied());
    }

    #[tokio::test(start_paused = true)]
    async fn builder_sink_sees_refills() {
        let sink = MemorySink::new();
        let limiter = RateLimiter::builder(config(2)).sink(sink.clone()).start().unwrap();
        limiter.try_acquire();

        tokio::time::sleep(WINDOW * 2 + Duration::from_millis(1)).await;

        assert_eq!(
            sink.events(),
            vec![
                GateEvent::Refilled { previous: 1, capacity: 2 },
                GateEvent::Refilled { previous: 2, capacity: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn works_as_admission_control_object() {
        let limiter = RateLimiter::start(config(1)).unwrap();
        let admission: Arc<dyn AdmissionControl> = Arc::new(limiter.clone());
        assert!(admission.try_acquire().is_allowed());
        assert!(limiter.try_acquire().is_denied());
        limiter.shutdown().await;
    }
}
