//! Unified error taxonomy for platform API operations
//!
//! Every failure that crosses a component boundary is expressed as an
//! [`ApiError`]. The request executor is the only place that turns raw
//! transport/HTTP outcomes into this taxonomy; batch execution, pagination,
//! and the sync scheduler branch on error kind alone and never inspect
//! transport details.
//!
//! ## Retry semantics
//!
//! | Variant | Retryable | Notes |
//! |---------|-----------|-------|
//! | `Auth` | no | surfaced for re-authorization |
//! | `QuotaExceeded` | yes | after the reported delay |
//! | `TransientServer` | yes | upstream 5xx |
//! | `Permission` | no | granted scopes are insufficient |
//! | `Validation` | no | caller bug, malformed request |
//! | `CircuitOpen` | no | breaker retries on its own once it half-opens |
//! | `Network` | yes | connect/reset failures |
//! | `Timeout` | yes | network timeout |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification bucket for an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing, expired, or rejected credentials
    Auth,
    /// A rate-limit scope ran out of quota
    Quota,
    /// Upstream server fault or network timeout
    Transient,
    /// Insufficient granted permissions
    Permission,
    /// Malformed request built by the caller
    Validation,
    /// Circuit breaker is refusing calls for the scope
    CircuitOpen,
    /// Transport failure before any HTTP status was produced
    Network,
    /// Local misconfiguration
    Config,
}

impl ErrorCategory {
    /// Stable label for log fields and retry bookkeeping.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Transient => "transient",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::CircuitOpen => "circuit_open",
            Self::Network => "network",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors surfaced by the integration core.
///
/// Variants carry owned data only so errors can cross task boundaries and be
/// serialized toward the UI layer.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiError {
    /// Credentials are absent, expired, or were rejected by the platform.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Human-readable cause, safe to show to the user
        message: String,
    },

    /// The quota bucket for `scope` is exhausted for the current window.
    #[error("Quota exceeded for scope {scope} (retry after {retry_after_ms}ms)")]
    QuotaExceeded {
        /// Scope key whose bucket rejected the call
        scope: String,
        /// Suggested wait before the next attempt
        retry_after_ms: u64,
    },

    /// The platform answered with a 5xx status.
    #[error("Upstream server error (status {status}): {message}")]
    TransientServer {
        /// HTTP status code returned by the platform
        status: u16,
        /// Upstream error body or status text
        message: String,
    },

    /// The granted OAuth scopes do not permit the requested operation.
    #[error("Permission denied: {message}")]
    Permission {
        /// Actionable description of the missing permission
        message: String,
    },

    /// The request is malformed; retrying the same request cannot succeed.
    #[error("Invalid request: {message}")]
    Validation {
        /// What the platform rejected
        message: String,
    },

    /// The circuit breaker for `scope` is open and refused the call without
    /// touching the network.
    #[error("Circuit open for scope {scope} (retry after {retry_after_ms}ms)")]
    CircuitOpen {
        /// Scope key whose breaker is open
        scope: String,
        /// Remaining cooldown before the breaker half-opens
        retry_after_ms: u64,
    },

    /// Transport-level failure (connect refused, reset, DNS).
    #[error("Network error: {message}")]
    Network {
        /// Underlying transport error description
        message: String,
    },

    /// The call did not complete within the configured deadline.
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time spent waiting before the deadline fired
        elapsed_ms: u64,
    },

    /// The operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,

    /// Local configuration prevented the call from being attempted.
    #[error("Configuration error: {message}")]
    Config {
        /// What is misconfigured
        message: String,
    },
}

impl ApiError {
    /// Shorthand for an [`ApiError::Auth`] with the given message.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    /// Shorthand for an [`ApiError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Shorthand for an [`ApiError::Network`] with the given message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Shorthand for an [`ApiError::Config`] with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Classification bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::QuotaExceeded { .. } => ErrorCategory::Quota,
            Self::TransientServer { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::Permission { .. } => ErrorCategory::Permission,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::Network { .. } | Self::Cancelled => ErrorCategory::Network,
            Self::Config { .. } => ErrorCategory::Config,
        }
    }

    /// Whether the retry policy may re-attempt after this error.
    ///
    /// Authentication and permission failures are never retried here; they
    /// must surface so the caller can re-authorize. An open circuit fails
    /// fast and is re-tried by the breaker itself once it half-opens.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. }
                | Self::TransientServer { .. }
                | Self::Network { .. }
                | Self::Timeout { .. }
        )
    }

    /// Minimum delay the platform asked us to observe before retrying, if it
    /// reported one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::QuotaExceeded { retry_after_ms, .. }
            | Self::CircuitOpen { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// True for failures that should prompt the user to re-authorize.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ApiError>;
