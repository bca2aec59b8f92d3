//! Resilience patterns guarding calls to the ads platform
//!
//! Three cooperating primitives protect every outbound call:
//!
//! - **Rate limiting** ([`RateLimiter`]): per-scope quota buckets that grant,
//!   delay, or reject calls before they reach the wire.
//! - **Circuit breaking** ([`CircuitBreaker`]): per-scope failure tracking
//!   that fails fast while a dependency is presumed unhealthy.
//! - **Retry backoff** ([`RetryPolicy`]): capped exponential delays with
//!   jitter for errors classified as transient.
//!
//! All three are generic over [`Clock`](crate::clock::Clock) so cooldowns,
//! window resets, and delay math are deterministic under test. State is
//! keyed per scope in registries backed by `DashMap`; independent scopes
//! never contend on a shared lock.
//!
//! The primitives are intentionally free of domain types: they speak string
//! scope keys and plain durations, and the request executor above them maps
//! their rejections into the application error taxonomy.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitBreakerRegistry, CircuitState, ResilienceError,
};
// Re-export rate limiter types
pub use rate_limiter::{
    BucketUsage, QuotaBucketConfig, RateLimitError, RateLimiter, RateLimiterConfig,
    RateLimiterConfigBuilder,
};
// Re-export retry types
pub use retry::{Jitter, RetryConfig, RetryConfigBuilder, RetryContext, RetryDecision, RetryPolicy};

/// Error returned when a resilience configuration fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid configuration: {message}")]
pub struct ConfigError {
    /// What failed validation
    pub message: String,
}

impl ConfigError {
    /// Create a configuration error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Result alias for configuration builders.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
