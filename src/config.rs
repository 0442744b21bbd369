//! Limiter configuration.
//!
//! [`RateLimiterConfig`] can only be obtained through validating constructors, so
//! a running limiter always has `capacity > 0` and `0 < window <= MAX_WINDOW`.
//! Raw values come from code, from [`LimiterSettings`] (deserializable with the
//! `serde` feature), or from the environment.

use crate::error::ConfigError;
use std::time::Duration;

/// Longest accepted refill window.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Environment variable holding the number of requests per window.
pub const ENV_MAX_REQUESTS: &str = "TOLLGATE_MAX_REQUESTS";
/// Environment variable holding the window length in milliseconds.
pub const ENV_PERIOD_MS: &str = "TOLLGATE_PERIOD_MS";

/// Validated limiter configuration. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    capacity: u64,
    window: Duration,
}

impl RateLimiterConfig {
    /// Create a config allowing `capacity` requests per `window`.
    ///
    /// # Examples
    /// ```
    /// use tollgate::RateLimiterConfig;
    /// use std::time::Duration;
    /// let config = RateLimiterConfig::new(100, Duration::from_secs(60)).unwrap();
    /// assert_eq!(config.capacity(), 100);
    /// assert!(RateLimiterConfig::new(0, Duration::from_secs(60)).is_err());
    /// ```
    pub fn new(capacity: u64, window: Duration) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { provided: 0 });
        }
        if window.is_zero() || window > MAX_WINDOW {
            return Err(ConfigError::InvalidWindow(window));
        }
        Ok(Self { capacity, window })
    }

    /// Read [`ENV_MAX_REQUESTS`] and [`ENV_PERIOD_MS`] from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any key/value source using the environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_requests = lookup(ENV_MAX_REQUESTS)
            .ok_or(ConfigError::MissingVar { name: ENV_MAX_REQUESTS })?;
        let max_requests: i64 = max_requests
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name: ENV_MAX_REQUESTS, value: max_requests })?;

        let period_ms =
            lookup(ENV_PERIOD_MS).ok_or(ConfigError::MissingVar { name: ENV_PERIOD_MS })?;
        let period_ms: u64 = period_ms
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name: ENV_PERIOD_MS, value: period_ms })?;

        Self::try_from(LimiterSettings { max_requests, period_ms })
    }

    /// Requests admitted per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Length of one window; the bucket is refilled once per window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Raw, unvalidated limiter settings as they appear in configuration files.
///
/// `max_requests` is signed so that negative values coming from loosely typed
/// sources are reported as [`ConfigError::InvalidCapacity`] rather than as parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LimiterSettings {
    /// Requests admitted per window.
    pub max_requests: i64,
    /// Window length in milliseconds.
    pub period_ms: u64,
}

impl TryFrom<LimiterSettings> for RateLimiterConfig {
    type Error = ConfigError;

    fn try_from(settings: LimiterSettings) -> Result<Self, Self::Error> {
        if settings.max_requests <= 0 {
            return Err(ConfigError::InvalidCapacity { provided: settings.max_requests });
        }
        // max_requests > 0 here, so the cast is lossless.
        Self::new(settings.max_requests as u64, Duration::from_millis(settings.period_ms))
    }
}
