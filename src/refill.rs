//! Refill scheduler: resets the bucket once per window on a fixed-rate timer.
//!
//! Semantics:
//! - Firings are anchored at `start + n * window` (fixed rate), where `start` is
//!   the moment [`RefillScheduler::spawn`] is called. The first firing happens one
//!   full window after start, never immediately.
//! - A firing that is late (stalled runtime, busy worker) is not skipped: missed
//!   firings run back to back in the same task, so refills are serialized and
//!   never run concurrently.
//! - Firing times do not depend on request volume or on how long the previous
//!   refill took. Events go to the sink without waiting on it, so a stuck sink
//!   cannot delay a refill or a stop.
//!
//! The task lives until [`RefillHandle::stop`] is awaited or the handle is dropped.

use crate::bucket::Bucket;
use crate::config::MAX_WINDOW;
use crate::error::{ConfigError, StartError};
use crate::telemetry::{try_emit, GateEvent, NullSink, TelemetrySink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Builder for the background refill task.
#[derive(Debug, Clone)]
pub struct RefillScheduler<T = NullSink> {
    bucket: Arc<Bucket>,
    window: Duration,
    sink: T,
}

impl RefillScheduler<NullSink> {
    /// Refill `bucket` every `window`.
    pub fn new(bucket: Arc<Bucket>, window: Duration) -> Self {
        Self { bucket, window, sink: NullSink }
    }
}

impl<T> RefillScheduler<T> {
    /// Emit a [`GateEvent::Refilled`] into `sink` after every refill.
    pub fn with_sink<U>(self, sink: U) -> RefillScheduler<U> {
        RefillScheduler { bucket: self.bucket, window: self.window, sink }
    }
}

impl<T> RefillScheduler<T>
where
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Spawn the refill task on the current tokio runtime.
    ///
    /// # Errors
    /// - [`StartError::NoRuntime`] when called outside a tokio runtime.
    /// - [`StartError::Config`] when `window` is zero or longer than [`MAX_WINDOW`].
    pub fn spawn(self) -> Result<RefillHandle, StartError> {
        if self.window.is_zero() || self.window > MAX_WINDOW {
            return Err(ConfigError::InvalidWindow(self.window).into());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StartError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let firings = Arc::new(AtomicU64::new(0));
        let first_firing = Instant::now() + self.window;

        let task = runtime.spawn(run_refills(
            self.bucket,
            first_firing,
            self.window,
            self.sink,
            cancel.clone(),
            firings.clone(),
        ));

        tracing::info!(window_ms = self.window.as_millis() as u64, "refill scheduler started");
        Ok(RefillHandle { cancel, task: Some(task), firings, window: self.window })
    }
}

async fn run_refills<T>(
    bucket: Arc<Bucket>,
    first_firing: Instant,
    window: Duration,
    sink: T,
    cancel: CancellationToken,
    firings: Arc<AtomicU64>,
) where
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    let mut ticker = tokio::time::interval_at(first_firing, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let previous = bucket.refill();
                let capacity = bucket.capacity();
                firings.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(previous, capacity, "refilled rate limiter bucket");
                try_emit(sink.clone(), GateEvent::Refilled { previous, capacity });
            }
        }
    }

    tracing::info!("refill scheduler stopped");
}

/// Handle to a running refill task.
///
/// Dropping the handle cancels the task; [`RefillHandle::stop`] also waits for it to exit.
#[derive(Debug)]
pub struct RefillHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    firings: Arc<AtomicU64>,
    window: Duration,
}

impl RefillHandle {
    /// Number of refills performed so far.
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::Relaxed)
    }

    /// Refill period.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the task and wait for it to exit. No refill starts after this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "refill task ended abnormally");
            }
        }
    }
}

impl Drop for RefillHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
