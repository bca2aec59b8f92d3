//! Per-scope circuit breakers with cooldown-gated recovery probes
//!
//! A breaker tracks consecutive failures for one scope. Once the failure
//! threshold is reached the circuit opens and every call is rejected without
//! touching the upstream platform. After the cooldown elapses the breaker
//! admits a limited number of trial calls (half-open); a trial success closes
//! the circuit, a trial failure re-opens it for a fresh cooldown.
//!
//! [`CircuitBreakerRegistry`] keys independent breakers by scope so one
//! misbehaving ad account cannot trip the circuit for the rest.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use super::{ConfigError, ConfigResult};
use crate::clock::{Clock, SystemClock};

/// Observable breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; failures are being counted.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A limited number of trial calls probe whether the scope recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{label}")
    }
}

/// Wraps an operation error with the breaker's fail-fast rejection.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit is open; the call was rejected without being attempted.
    #[error("Circuit open; retry after {retry_after:?}")]
    CircuitOpen {
        /// Time until the breaker will admit a trial call
        retry_after: Duration,
    },

    /// The call was admitted and failed; the failure has been recorded.
    #[error("Operation failed: {source}")]
    OperationFailed {
        /// Underlying operation error
        #[source]
        source: E,
    },
}

/// Thresholds controlling when a breaker trips and recovers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing
    pub cooldown: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Start building a breaker configuration.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be greater than 0"));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::new("cooldown must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::new("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures that open the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// How long an open circuit rejects calls before probing.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Trial calls admitted while half-open.
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Counter snapshot for dashboards and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Current state at the time of the snapshot
    pub state: CircuitState,
    /// Consecutive failures recorded since the last success
    pub consecutive_failures: u32,
    /// Calls admitted through the breaker
    pub total_calls: u64,
    /// Admitted calls that succeeded
    pub total_successes: u64,
    /// Admitted calls that failed
    pub total_failures: u64,
    /// Calls rejected while the circuit was open
    pub rejected_calls: u64,
}

/// Failure-tracking state machine for a single scope.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    half_open_in_flight: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    clock: C,
}

impl CircuitBreaker {
    /// Breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Breaker on an explicit clock (tests use [`MockClock`]).
    ///
    /// [`MockClock`]: crate::clock::MockClock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_in_flight: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            clock,
        }
    }

    /// Ask to route one call through the breaker.
    ///
    /// `Ok(())` admits the call; the caller must report the outcome via
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). `Err` carries the time until
    /// the breaker will next admit a trial call.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let state = *read_lock(&self.state);
        match state {
            CircuitState::Closed => {
                self.total_calls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            CircuitState::Open => {
                let remaining = self.cooldown_remaining();
                if !remaining.is_zero() {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    return Err(remaining);
                }
                // Cooldown elapsed; transition under the write lock and
                // claim the first trial slot for this caller.
                let mut guard = write_lock(&self.state);
                if *guard == CircuitState::Open {
                    *guard = CircuitState::HalfOpen;
                    self.half_open_in_flight.store(1, Ordering::Release);
                    info!(state = %CircuitState::HalfOpen, "circuit cooldown elapsed; admitting trial call");
                    self.total_calls.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                drop(guard);
                self.try_acquire_half_open()
            }
            CircuitState::HalfOpen => self.try_acquire_half_open(),
        }
    }

    fn try_acquire_half_open(&self) -> Result<(), Duration> {
        let max = self.config.half_open_max_calls;
        let claimed = self
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                (in_flight < max).then_some(in_flight + 1)
            });
        match claimed {
            Ok(_) => {
                self.total_calls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                // Trial slots are taken; report a full cooldown rather than
                // guessing when the in-flight trial resolves.
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                Err(self.config.cooldown)
            }
        }
    }

    /// Record a successful call. A trial success closes the circuit.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        let state = *read_lock(&self.state);
        if state == CircuitState::HalfOpen {
            let mut guard = write_lock(&self.state);
            if *guard == CircuitState::HalfOpen {
                *guard = CircuitState::Closed;
                self.half_open_in_flight.store(0, Ordering::Release);
                *write_lock(&self.opened_at) = None;
                info!(state = %CircuitState::Closed, "trial call succeeded; circuit closed");
            }
        }
    }

    /// Record a failed call. At the threshold (or on a trial failure) the
    /// circuit opens for a fresh cooldown.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let state = *read_lock(&self.state);
        match state {
            CircuitState::HalfOpen => self.trip("trial call failed; circuit re-opened"),
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                self.trip("failure threshold reached; circuit opened");
            }
            _ => {}
        }
    }

    fn trip(&self, reason: &str) {
        let mut guard = write_lock(&self.state);
        *guard = CircuitState::Open;
        self.half_open_in_flight.store(0, Ordering::Release);
        *write_lock(&self.opened_at) = Some(self.clock.now());
        warn!(
            state = %CircuitState::Open,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "{reason}"
        );
    }

    /// Current state, accounting for an elapsed cooldown.
    pub fn state(&self) -> CircuitState {
        let state = *read_lock(&self.state);
        if state == CircuitState::Open && self.cooldown_remaining().is_zero() {
            CircuitState::HalfOpen
        } else {
            state
        }
    }

    /// Time until an open circuit admits a trial call. Zero when the breaker
    /// is not open or the cooldown has elapsed.
    pub fn cooldown_remaining(&self) -> Duration {
        let opened_at = *read_lock(&self.opened_at);
        match opened_at {
            Some(opened) => {
                let elapsed = self.clock.now().saturating_duration_since(opened);
                self.config.cooldown.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to closed with all counters cleared.
    pub fn reset(&self) {
        *write_lock(&self.state) = CircuitState::Closed;
        *write_lock(&self.opened_at) = None;
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_in_flight.store(0, Ordering::Release);
    }

    /// Run `operation` through the breaker, recording its outcome.
    ///
    /// # Errors
    ///
    /// [`ResilienceError::CircuitOpen`] when the call is rejected without
    /// being attempted, [`ResilienceError::OperationFailed`] when the call
    /// was admitted and failed.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.try_acquire()
            .map_err(|retry_after| ResilienceError::CircuitOpen { retry_after })?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(source) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source })
            }
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures.load(Ordering::Relaxed))
            .finish()
    }
}

/// Keyed registry of breakers, one per scope, created on first use.
pub struct CircuitBreakerRegistry<K, C = SystemClock>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    breakers: DashMap<K, Arc<CircuitBreaker<C>>>,
    config: CircuitBreakerConfig,
    clock: C,
}

impl<K> CircuitBreakerRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Registry on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<K, C> CircuitBreakerRegistry<K, C>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    /// Registry on an explicit clock. Each breaker receives a clone of the
    /// clock, so a shared [`MockClock`] advances every breaker at once.
    ///
    /// [`MockClock`]: crate::clock::MockClock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self { breakers: DashMap::new(), config, clock }
    }

    /// Breaker for `key`, created closed on first use.
    pub fn breaker(&self, key: &K) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        let created =
            Arc::new(CircuitBreaker::with_clock(self.config.clone(), self.clock.clone()));
        let entry = self.breakers.entry(key.clone()).or_insert(created);
        Arc::clone(entry.value())
    }

    /// Current state for `key`; `Closed` for scopes never seen.
    pub fn state(&self, key: &K) -> CircuitState {
        self.breakers.get(key).map_or(CircuitState::Closed, |breaker| breaker.state())
    }

    /// Reset every breaker to closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

impl<K, C> fmt::Debug for CircuitBreakerRegistry<K, C>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry").field("scopes", &self.breakers.len()).finish()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    //! Unit tests for resilience::circuit_breaker.
    use super::*;
    use crate::clock::MockClock;

    fn breaker_with_mock(threshold: u32, cooldown_secs: u64) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .cooldown(Duration::from_secs(cooldown_secs))
            .build()
            .expect("valid config");
        (CircuitBreaker::with_clock(config, clock.clone()), clock)
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the threshold
    /// trip scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit stays closed below the threshold.
    /// - Confirms the circuit opens exactly at the threshold.
    /// - Confirms an open circuit rejects with a positive retry hint.
    #[test]
    fn opens_at_failure_threshold() {
        let (breaker, _clock) = breaker_with_mock(3, 60);

        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let retry_after = breaker.try_acquire().unwrap_err();
        assert!(retry_after > Duration::ZERO);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (breaker, _clock) = breaker_with_mock(3, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        breaker.try_acquire().unwrap();
        breaker.record_failure();

        breaker.try_acquire().unwrap();
        breaker.record_success();

        // The counter restarted, so two more failures stay below threshold.
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the cooldown and
    /// recovery scenario.
    ///
    /// Assertions:
    /// - Confirms calls are rejected while the cooldown runs.
    /// - Confirms one trial call is admitted after the cooldown.
    /// - Confirms a trial success closes the circuit.
    #[test]
    fn half_open_trial_success_closes() {
        let (breaker, clock) = breaker_with_mock(1, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());

        clock.advance(Duration::from_secs(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.try_acquire().unwrap();
    }

    #[test]
    fn half_open_trial_failure_reopens() {
        let (breaker, clock) = breaker_with_mock(1, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // A fresh cooldown applies after the failed trial.
        assert!(breaker.try_acquire().is_err());
        clock.advance(Duration::from_secs(60));
        breaker.try_acquire().unwrap();
    }

    #[test]
    fn half_open_admits_limited_trials() {
        let (breaker, clock) = breaker_with_mock(1, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));

        // Only one trial slot by default; the second caller is rejected.
        breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn metrics_track_rejections() {
        let (breaker, _clock) = breaker_with_mock(1, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        let _ = breaker.try_acquire();
        let _ = breaker.try_acquire();

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.rejected_calls, 2);
        assert_eq!(metrics.state, CircuitState::Open);
    }

    #[test]
    fn reset_returns_to_closed() {
        let (breaker, _clock) = breaker_with_mock(1, 60);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap();
    }

    /// Validates `CircuitBreakerRegistry::breaker` behavior for the scope
    /// isolation scenario.
    ///
    /// Assertions:
    /// - Confirms tripping one scope's breaker leaves other scopes closed.
    /// - Confirms repeated lookups return the same breaker instance.
    #[test]
    fn registry_isolates_scopes() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .cooldown(Duration::from_secs(60))
            .build()
            .expect("valid config");
        let registry: CircuitBreakerRegistry<String, MockClock> =
            CircuitBreakerRegistry::with_clock(config, clock);

        let key_a = "account:1".to_string();
        let key_b = "account:2".to_string();

        let breaker_a = registry.breaker(&key_a);
        breaker_a.try_acquire().unwrap();
        breaker_a.record_failure();

        assert_eq!(registry.state(&key_a), CircuitState::Open);
        assert_eq!(registry.state(&key_b), CircuitState::Closed);

        let again = registry.breaker(&key_a);
        assert_eq!(again.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn execute_records_outcomes() {
        #[derive(Debug, thiserror::Error)]
        #[error("boom")]
        struct Boom;

        let (breaker, _clock) = breaker_with_mock(1, 60);

        let ok = breaker.execute(|| async { Ok::<_, Boom>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = breaker.execute(|| async { Err::<i32, _>(Boom) }).await;
        assert!(matches!(err, Err(ResilienceError::OperationFailed { .. })));

        let rejected = breaker.execute(|| async { Ok::<_, Boom>(7) }).await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[test]
    fn config_validation_rejects_zero_threshold() {
        let result = CircuitBreakerConfig::builder().failure_threshold(0).build();
        assert!(result.is_err());
    }
}
