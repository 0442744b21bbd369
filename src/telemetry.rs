//! Telemetry for the gate and its refill scheduler.
//!
//! The gate and the scheduler emit [`GateEvent`]s into a [`TelemetrySink`],
//! which is just a `tower::Service<GateEvent>`. Sinks are best-effort: a sink
//! that is not ready or fails never affects an admission decision.
//!
//! # Event Types
//!
//! - **Gate**: `Admitted`, `Rejected`, `Exempted`
//! - **Refill scheduler**: `Refilled`
//!
//! ```rust
//! use tollgate::telemetry::GateEvent;
//!
//! let admitted = GateEvent::Admitted { remaining: 41 };
//! assert_eq!(admitted.to_string(), "Admitted(remaining=41)");
//! ```

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes gate events.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use tollgate::telemetry::{GateEvent, TelemetrySink};
/// use tower::Service;
/// use std::task::{Context, Poll};
/// use std::pin::Pin;
/// use std::future::Future;
///
/// #[derive(Clone)]
/// struct PrintSink;
///
/// impl Service<GateEvent> for PrintSink {
///     type Response = ();
///     type Error = std::convert::Infallible;
///     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, event: GateEvent) -> Self::Future {
///         println!("gate event: {}", event);
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// impl TelemetrySink for PrintSink {
///     type SinkError = std::convert::Infallible;
/// }
/// ```
pub trait TelemetrySink:
    tower::Service<GateEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Waits for the sink to become ready, so only use it where waiting is fine
/// (the [`NonBlockingSink`] worker). The gate and the refill task use [`try_emit`].
pub async fn emit_best_effort<S>(sink: S, event: GateEvent)
where
    S: tower::Service<GateEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Hand `event` to `sink` without waiting.
///
/// Readiness is polled once; a sink that is not ready (or fails) loses the
/// event and `false` is returned. A call future that does not finish on its
/// first poll is spawned onto the current tokio runtime, or dropped when there
/// is none. Wrap slow sinks in [`NonBlockingSink`] to queue instead of drop.
pub fn try_emit<S>(sink: S, event: GateEvent) -> bool
where
    S: tower::Service<GateEvent, Response = ()>,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    use futures::FutureExt;
    use tower::ServiceExt;

    let mut ready_sink = match sink.ready_oneshot().now_or_never() {
        Some(Ok(ready_sink)) => ready_sink,
        Some(Err(_)) | None => return false,
    };

    let mut call = Box::pin(ready_sink.call(event));
    if call.as_mut().now_or_never().is_none() {
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = call.await;
            });
        }
    }
    true
}

/// Events emitted by the gate and the refill scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// A request passed the admission check.
    Admitted {
        /// Admissions left in the current window.
        remaining: u64,
    },
    /// A request was turned away with 429.
    Rejected,
    /// A request matched the exemption rule and skipped the admission check.
    Exempted,
    /// The refill scheduler reset the bucket.
    Refilled {
        /// Value of `remaining` just before the reset.
        previous: u64,
        /// Value after the reset.
        capacity: u64,
    },
}

impl GateEvent {
    /// Stable lowercase label, suitable for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            GateEvent::Admitted { .. } => "admitted",
            GateEvent::Rejected => "rejected",
            GateEvent::Exempted => "exempted",
            GateEvent::Refilled { .. } => "refilled",
        }
    }
}

impl fmt::Display for GateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateEvent::Admitted { remaining } => write!(f, "Admitted(remaining={})", remaining),
            GateEvent::Rejected => write!(f, "Rejected"),
            GateEvent::Exempted => write!(f, "Exempted"),
            GateEvent::Refilled { previous, capacity } => {
                write!(f, "Refilled({} -> {})", previous, capacity)
            }
        }
    }
}

// ============================================================================
// Built-in Telemetry Sinks
// ============================================================================

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GateEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GateEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Refills are logged at DEBUG, everything else at TRACE, so a busy gate does
/// not flood INFO logs.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GateEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        match event {
            GateEvent::Refilled { .. } => tracing::debug!(event = %event, "gate_event"),
            _ => tracing::trace!(event = %event, "gate_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory.
///
/// Useful for testing and debugging. Oldest events are evicted once
/// `capacity` is reached.
///
/// # Example
///
/// ```rust
/// use tollgate::telemetry::{GateEvent, MemorySink};
/// use tower::Service;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = MemorySink::new();
/// sink.call(GateEvent::Rejected).await.unwrap();
/// assert_eq!(sink.events(), vec![GateEvent::Rejected]);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GateEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a snapshot of all events received so far.
    pub fn events(&self) -> Vec<GateEvent> {
        self.events.lock().expect("memory sink poisoned").clone()
    }

    /// Number of stored events matching `label` (see [`GateEvent::label`]).
    pub fn count(&self, label: &str) -> usize {
        let guard = self.events.lock().expect("memory sink poisoned");
        guard.iter().filter(|e| e.label() == label).count()
    }

    /// Clears all stored events.
    pub fn clear(&self) {
        self.events.lock().expect("memory sink poisoned").clear();
    }

    /// Returns the number of events stored.
    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink poisoned").len()
    }

    /// Returns true if no events are stored.
    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("memory sink poisoned").is_empty()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of evicted events.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GateEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        let mut guard = self.events.lock().expect("memory sink poisoned");
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

// ============================================================================
// Non-blocking sink wrapper
// ============================================================================

/// Queues events for a sink that may be slow or not always ready.
///
/// Calls never wait: events go into a bounded channel drained by a worker task,
/// which waits on the wrapped sink with [`emit_best_effort`]. When the queue is
/// full the event is dropped and counted. Must be created inside a tokio runtime.
#[derive(Clone, Debug)]
pub struct NonBlockingSink<S> {
    tx: tokio::sync::mpsc::Sender<GateEvent>,
    dropped: Arc<AtomicU64>,
    _sink: PhantomData<fn() -> S>,
}

impl<S> NonBlockingSink<S>
where
    S: tower::Service<GateEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    /// Wrap `sink` behind a queue of `capacity` events (at least one).
    pub fn with_capacity(sink: S, capacity: usize) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::channel(capacity.max(1));

        // The worker owns the sink and exits once every sender is gone.
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                emit_best_effort(sink.clone(), event).await;
            }
        });

        Self { tx, dropped: Arc::new(AtomicU64::new(0)), _sink: PhantomData }
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S> tower::Service<GateEvent> for NonBlockingSink<S>
where
    S: tower::Service<GateEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl<S> TelemetrySink for NonBlockingSink<S>
where
    S: tower::Service<GateEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    type SinkError = Infallible;
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::StuckSink;
    use std::time::Duration;

    #[test]
    fn gate_event_display() {
        assert_eq!(GateEvent::Admitted { remaining: 2 }.to_string(), "Admitted(remaining=2)");
        assert_eq!(GateEvent::Rejected.to_string(), "Rejected");
        assert_eq!(GateEvent::Exempted.to_string(), "Exempted");
        assert_eq!(GateEvent::Refilled { previous: 0, capacity: 5 }.to_string(), "Refilled(0 -> 5)");
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(GateEvent::Admitted { remaining: 0 }.label(), "admitted");
        assert_eq!(GateEvent::Rejected.label(), "rejected");
        assert_eq!(GateEvent::Exempted.label(), "exempted");
        assert_eq!(GateEvent::Refilled { previous: 1, capacity: 1 }.label(), "refilled");
    }

    #[tokio::test]
    async fn test_null_sink() {
        let mut sink = NullSink;
        sink.call(GateEvent::Rejected).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let mut sink = MemorySink::with_capacity(2);
        assert!(sink.is_empty());
        assert_eq!(sink.capacity(), 2);

        sink.call(GateEvent::Admitted { remaining: 1 }).await.unwrap();
        sink.call(GateEvent::Admitted { remaining: 0 }).await.unwrap();
        sink.call(GateEvent::Rejected).await.unwrap(); // should evict oldest

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events(), vec![GateEvent::Admitted { remaining: 0 }, GateEvent::Rejected]);
        assert_eq!(sink.count("admitted"), 1);
        assert_eq!(sink.count("rejected"), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn emit_best_effort_delivers_to_ready_sink() {
        let sink = MemorySink::new();
        emit_best_effort(sink.clone(), GateEvent::Exempted).await;
        assert_eq!(sink.events(), vec![GateEvent::Exempted]);
    }

    #[derive(Clone)]
    struct FailingSink;

    #[derive(Debug)]
    struct SinkDown;

    impl fmt::Display for SinkDown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sink down")
        }
    }

    impl std::error::Error for SinkDown {}

    impl Service<GateEvent> for FailingSink {
        type Response = ();
        type Error = SinkDown;
        type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err(SinkDown))
        }

        fn call(&mut self, _event: GateEvent) -> Self::Future {
            Box::pin(async { Err(SinkDown) })
        }
    }

    #[tokio::test]
    async fn emit_best_effort_swallows_sink_errors() {
        emit_best_effort(FailingSink, GateEvent::Rejected).await;
    }

    #[tokio::test]
    async fn non_blocking_sink_forwards_events() {
        let memory = MemorySink::new();
        let mut sink = NonBlockingSink::with_capacity(memory.clone(), 16);
        sink.call(GateEvent::Refilled { previous: 0, capacity: 3 }).await.unwrap();

        for _ in 0..50 {
            if !memory.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(memory.events(), vec![GateEvent::Refilled { previous: 0, capacity: 3 }]);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn try_emit_drops_event_when_sink_not_ready() {
        assert!(!try_emit(StuckSink, GateEvent::Rejected));
        assert!(!try_emit(FailingSink, GateEvent::Rejected));

        let memory = MemorySink::new();
        assert!(try_emit(memory.clone(), GateEvent::Exempted));
        assert_eq!(memory.events(), vec![GateEvent::Exempted]);
    }

    /// Ready at once, but each call takes a while to finish.
    #[derive(Clone)]
    struct SlowCallSink(MemorySink);

    impl Service<GateEvent> for SlowCallSink {
        type Response = ();
        type Error = Infallible;
        type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, event: GateEvent) -> Self::Future {
            let mut memory = self.0.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                memory.call(event).await
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn try_emit_finishes_slow_calls_in_background() {
        let memory = MemorySink::new();
        assert!(try_emit(SlowCallSink(memory.clone()), GateEvent::Rejected));
        assert!(memory.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(memory.events(), vec![GateEvent::Rejected]);
    }

    #[tokio::test]
    async fn non_blocking_sink_queues_for_stuck_sink_and_counts_drops() {
        let mut sink = NonBlockingSink::with_capacity(StuckSink, 1);
        for _ in 0..3 {
            sink.call(GateEvent::Rejected).await.unwrap();
        }
        assert!(sink.dropped() >= 1, "a full queue must drop, not wait");
    }
}
