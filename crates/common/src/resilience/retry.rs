//! Bounded exponential backoff with jitter
//!
//! [`RetryPolicy`] decides, after each failed attempt, whether to retry and
//! how long to wait first. The delay doubles from a configured base up to a
//! hard cap, jitter decorrelates callers that failed at the same moment, and
//! a platform-supplied reset hint (from a quota rejection) takes precedence
//! over the computed backoff when it is longer.
//!
//! The policy never inspects errors itself. Callers classify the failure and
//! pass a single `retryable` flag, keeping classification in one place.

use std::time::Duration;

use rand::Rng;

use super::{ConfigError, ConfigResult};

/// How the computed backoff delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the computed delay exactly
    None,
    /// Uniform over `(0, delay]`
    Full,
    /// Uniform over `(delay/2, delay]`
    #[default]
    Equal,
}

/// Backoff shape and attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the initial call (3 means up to 4 calls total)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Hard cap on any single delay, before jitter
    pub max_delay: Duration,
    /// Randomization applied to each delay
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Equal,
        }
    }
}

impl RetryConfig {
    /// Start building a retry configuration.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts must be greater than 0"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::new("base_delay must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::new("max_delay must be at least base_delay"));
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Attempts after the initial call.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self
    }

    /// Hard cap on any single delay, before jitter.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    /// Randomization applied to each delay.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-call bookkeeping threaded through a retry loop.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Retries already performed (not counting the initial call)
    pub attempt: u32,
    /// Total time spent sleeping between attempts
    pub elapsed_delay: Duration,
    /// Classification label of the most recent failure, for logs
    pub last_error_kind: Option<String>,
}

impl RetryContext {
    /// Fresh context for a new logical call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a retry was scheduled after a failure of `kind`.
    pub fn record_attempt(&mut self, kind: impl Into<String>, delay: Duration) {
        self.attempt += 1;
        self.elapsed_delay += delay;
        self.last_error_kind = Some(kind.into());
    }
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then retry.
    Retry {
        /// Delay to sleep before the next attempt
        after: Duration,
    },
    /// Give up; surface the failure to the caller.
    Stop,
}

/// Stateless backoff calculator shared across calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { config: RetryConfig::default() }
    }
}

impl RetryPolicy {
    /// Policy with the given backoff shape.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Attempts after the initial call.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether to retry after a failure.
    ///
    /// `retryable` is the caller's classification of the failure;
    /// non-retryable failures always stop. `platform_delay` is an
    /// authoritative wait hint (a quota reset) that overrides a shorter
    /// computed backoff.
    pub fn decide(
        &self,
        retryable: bool,
        platform_delay: Option<Duration>,
        context: &RetryContext,
    ) -> RetryDecision {
        if !retryable || context.attempt >= self.config.max_attempts {
            return RetryDecision::Stop;
        }

        let mut delay = self.jittered(self.backoff_delay(context.attempt));
        if let Some(hint) = platform_delay {
            delay = delay.max(hint);
        }
        RetryDecision::Retry { after: delay }
    }

    /// Raw backoff for retry number `retry_index` (0-based): base doubled
    /// per retry, capped, no jitter.
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry_index.min(10));
        let scaled = self.config.base_delay.saturating_mul(factor);
        scaled.min(self.config.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis().max(1) as u64;
        match self.config.jitter {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rand::thread_rng().gen_range(1..=millis)),
            Jitter::Equal => {
                let half = (millis / 2).max(1);
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=millis - half))
            }
        }
    }
}
