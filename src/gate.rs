//! Request gate: a tower layer that admits or rejects HTTP requests.
//!
//! Every request whose path is not exempt consumes one admission from the
//! shared bucket. When none is left the inner service is not called and the
//! gate answers `429 Too Many Requests` with an empty body and no extra headers.
//!
//! ```rust
//! use tollgate::{Bucket, GateLayer};
//! use http::{Request, Response, StatusCode};
//! use std::convert::Infallible;
//! use tower::{Layer, ServiceExt};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let inner = tower::service_fn(|_req: Request<()>| async {
//!     Ok::<_, Infallible>(Response::new(String::from("ok")))
//! });
//! let svc = GateLayer::new(Bucket::full(1)).layer(inner);
//!
//! let first = svc.clone().oneshot(Request::new(())).await.unwrap();
//! assert_eq!(first.status(), StatusCode::OK);
//! let second = svc.oneshot(Request::new(())).await.unwrap();
//! assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
//! # }
//! ```

use crate::admission::{AdmissionControl, Decision};
use crate::telemetry::{try_emit, GateEvent, NullSink, TelemetrySink};
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Path fragments exempt from rate limiting unless configured otherwise.
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &["/actuator", "/health", "/metrics"];

/// Decides which request paths bypass the admission check.
pub trait ExemptionRule: Send + Sync + 'static {
    /// `true` if a request for `path` must always reach the inner service.
    fn is_exempt(&self, path: &str) -> bool;
}

impl<F> ExemptionRule for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn is_exempt(&self, path: &str) -> bool {
        self(path)
    }
}

/// Rate-limit every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExemption;

impl ExemptionRule for NoExemption {
    fn is_exempt(&self, _path: &str) -> bool {
        false
    }
}

/// Exempt any path containing one of the configured fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContains {
    fragments: Vec<String>,
}

impl PathContains {
    /// Exempt paths containing any of `fragments`.
    pub fn new<I, P>(fragments: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self { fragments: fragments.into_iter().map(Into::into).collect() }
    }

    /// Configured fragments.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }
}

impl Default for PathContains {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPT_PATHS.iter().copied())
    }
}

impl ExemptionRule for PathContains {
    fn is_exempt(&self, path: &str) -> bool {
        self.fragments.iter().any(|fragment| path.contains(fragment.as_str()))
    }
}

/// Layer that wraps a service with the request gate.
pub struct GateLayer<A: ?Sized, T = NullSink> {
    admission: Arc<A>,
    exemptions: Arc<dyn ExemptionRule>,
    sink: T,
}

impl<A> GateLayer<A, NullSink>
where
    A: AdmissionControl,
{
    /// Gate requests on `admission`, exempting [`DEFAULT_EXEMPT_PATHS`].
    pub fn new(admission: A) -> Self {
        Self::shared(Arc::new(admission))
    }
}

impl<A> GateLayer<A, NullSink>
where
    A: AdmissionControl + ?Sized,
{
    /// Gate requests on an already shared admission control.
    pub fn shared(admission: Arc<A>) -> Self {
        Self { admission, exemptions: Arc::new(PathContains::default()), sink: NullSink }
    }
}

impl<A: ?Sized, T> GateLayer<A, T> {
    /// Replace the exemption rule.
    pub fn exempt<R: ExemptionRule>(mut self, rule: R) -> Self {
        self.exemptions = Arc::new(rule);
        self
    }

    /// Emit one [`GateEvent`] per request into `sink`.
    pub fn with_sink<U>(self, sink: U) -> GateLayer<A, U> {
        GateLayer { admission: self.admission, exemptions: self.exemptions, sink }
    }
}

impl<A: ?Sized, T: Clone> Clone for GateLayer<A, T> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            exemptions: self.exemptions.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<A: ?Sized, T: fmt::Debug> fmt::Debug for GateLayer<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateLayer").field("sink", &self.sink).finish_non_exhaustive()
    }
}

impl<S, A, T> Layer<S> for GateLayer<A, T>
where
    A: ?Sized,
    T: Clone,
{
    type Service = GateService<S, A, T>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService {
            inner,
            admission: self.admission.clone(),
            exemptions: self.exemptions.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Service produced by [`GateLayer`].
pub struct GateService<S, A: ?Sized, T = NullSink> {
    inner: S,
    admission: Arc<A>,
    exemptions: Arc<dyn ExemptionRule>,
    sink: T,
}

impl<S: Clone, A: ?Sized, T: Clone> Clone for GateService<S, A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: self.admission.clone(),
            exemptions: self.exemptions.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S: fmt::Debug, A: ?Sized, T: fmt::Debug> fmt::Debug for GateService<S, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateService")
            .field("inner", &self.inner)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl<S, A, T, ReqBody, ResBody> Service<Request<ReqBody>> for GateService<S, A, T>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    A: AdmissionControl + ?Sized,
    T: TelemetrySink,
    T::Future: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    // Events are handed to the sink without waiting; see `try_emit`.
    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let sink = self.sink.clone();

        if self.exemptions.is_exempt(req.uri().path()) {
            tracing::trace!(path = req.uri().path(), "request exempt from rate limit");
            try_emit(sink, GateEvent::Exempted);
            return Box::pin(self.inner.call(req));
        }

        match self.admission.try_acquire() {
            Decision::Allowed { remaining } => {
                try_emit(sink, GateEvent::Admitted { remaining });
                Box::pin(self.inner.call(req))
            }
            Decision::Denied => {
                tracing::debug!(
                    method = %req.method(),
                    path = req.uri().path(),
                    "request rejected: rate limit exceeded"
                );
                try_emit(sink, GateEvent::Rejected);
                Box::pin(futures::future::ready(Ok(too_many_requests())))
            }
        }
    }
}

fn too_many_requests<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
}
