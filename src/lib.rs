#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! A fixed-window global rate limit for tower HTTP services.
//!
//! One shared bucket admits at most `capacity` requests per window. A
//! background task refills it to exactly `capacity` once per window on a
//! fixed-rate schedule; nothing carries over between windows. The
//! [`GateLayer`] checks the bucket before every non-exempt request and answers
//! `429 Too Many Requests` with an empty body once it is exhausted.
//!
//! ## Features
//!
//! - **Two-phase admission check**: a lock-free read denies exhausted buckets
//!   without contention, a short critical section decrements.
//! - **Fixed-rate refill** on a tokio timer, first firing one window after start
//! - **Path exemptions** for health and metrics endpoints
//! - **Telemetry sinks** as plain `tower::Service<GateEvent>`
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{GateLayer, RateLimiter, RateLimiterConfig};
//! use http::{Request, Response, StatusCode};
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use tower::{Layer, ServiceExt};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimiterConfig::new(100, Duration::from_secs(60)).unwrap();
//!     let limiter = RateLimiter::start(config).unwrap();
//!
//!     let app = tower::service_fn(|_req: Request<()>| async {
//!         Ok::<_, Infallible>(Response::new(String::from("hello")))
//!     });
//!     let svc = GateLayer::new(limiter.clone()).layer(app);
//!
//!     let resp = svc.oneshot(Request::new(())).await.unwrap();
//!     assert_eq!(resp.status(), StatusCode::OK);
//!
//!     limiter.shutdown().await;
//! }
//! ```

pub mod admission;
pub mod bucket;
pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod prelude;
pub mod refill;
mod sync;
pub mod telemetry;

// Re-exports
pub use admission::{AdmissionControl, Decision};
pub use bucket::{Bucket, BucketSnapshot};
pub use config::{LimiterSettings, RateLimiterConfig, MAX_WINDOW};
pub use error::{ConfigError, StartError};
pub use gate::{
    ExemptionRule, GateLayer, GateService, NoExemption, PathContains, DEFAULT_EXEMPT_PATHS,
};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use refill::{RefillHandle, RefillScheduler};
pub use telemetry::{
    GateEvent, LogSink, MemorySink, NonBlockingSink, NullSink, TelemetrySink,
};
