//! # AdBridge Common
//!
//! Reusable, framework-agnostic building blocks shared across the AdBridge
//! workspace:
//!
//! - [`clock`]: time abstraction so time-dependent code is deterministic in
//!   tests
//! - [`resilience`]: per-scope rate limiting, circuit breaking, and retry
//!   backoff
//! - [`vault`]: encrypted, device-bound credential storage
//! - [`auth`]: PKCE/state helpers and OAuth token types
//!
//! ## Feature tiers
//!
//! The crate exposes opt-in feature tiers instead of a monolithic default:
//!
//! - `foundation`: pure utilities (serde types, hashing, clock)
//! - `observability`: adds `tracing` instrumentation
//! - `runtime`: adds tokio-based primitives, registries, and the vault
//!
//! Downstream crates enable the tier they need; nothing is compiled in by
//! default.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[cfg(feature = "foundation")]
pub mod clock;

#[cfg(feature = "runtime")]
pub mod auth;

#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(feature = "runtime")]
pub mod vault;

// Re-export the primitives most callers reach for
#[cfg(feature = "runtime")]
pub use auth::{OAuthConfig, PkceChallenge, TokenSet};
#[cfg(feature = "foundation")]
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, RateLimitError,
    RateLimiter, RateLimiterConfig, RetryConfig, RetryContext, RetryDecision, RetryPolicy,
};
#[cfg(feature = "runtime")]
pub use vault::{CredentialVault, VaultConfig, VaultError, VaultStore};
