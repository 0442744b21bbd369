//! Convenient re-exports for common tollgate types.
pub use crate::{
    admission::{AdmissionControl, Decision},
    config::{LimiterSettings, RateLimiterConfig},
    error::{ConfigError, StartError},
    gate::{ExemptionRule, GateLayer, NoExemption, PathContains},
    limiter::RateLimiter,
    telemetry::{GateEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};
