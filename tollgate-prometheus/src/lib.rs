//! Prometheus metrics sink for `tollgate`.
//! Bring your own `prometheus::Registry`; metrics are registered into it and
//! updated from every [`GateEvent`].

use prometheus::{IntCounterVec, IntGauge, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use tollgate::telemetry::{GateEvent, TelemetrySink};

/// Counts gate events and tracks the last reported bucket level.
#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    events: IntCounterVec,
    remaining: IntGauge,
}

impl PrometheusSink {
    /// Create a sink and register its metrics into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let events = IntCounterVec::new(
            prometheus::Opts::new("tollgate_events_total", "Rate limit gate events"),
            &["event"],
        )?;
        let remaining = IntGauge::new(
            "tollgate_bucket_remaining",
            "Requests left in the current window, as of the last admission or refill",
        )?;
        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(remaining.clone()))?;
        tracing::debug!("registered tollgate prometheus metrics");
        Ok(Self { registry, events, remaining })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current value of the `tollgate_bucket_remaining` gauge.
    pub fn remaining(&self) -> i64 {
        self.remaining.get()
    }
}

impl tower_service::Service<GateEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        self.events.with_label_values(&[event.label()]).inc();
        match event {
            GateEvent::Admitted { remaining } => self.remaining.set(saturating_i64(remaining)),
            GateEvent::Rejected => self.remaining.set(0),
            GateEvent::Refilled { capacity, .. } => self.remaining.set(saturating_i64(capacity)),
            GateEvent::Exempted => {}
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
