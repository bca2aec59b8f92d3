//! Per-scope quota buckets with authoritative resynchronization
//!
//! The upstream ads platform meters calls in independent windows per scope
//! (application, user, ad account). [`RateLimiter`] mirrors that partitioning
//! locally: a keyed registry of [`QuotaBucket`]s, each tracking an atomic
//! used-count against a ceiling for the current reset window.
//!
//! `acquire` either grants immediately, suspends the caller until the next
//! window when the bucket is exhausted, or fails fast with
//! [`RateLimitError::Exhausted`] when configured to. Because local accounting
//! drifts from the platform's own metering, buckets accept authoritative
//! readings via [`RateLimiter::resync`] whenever a response reports its usage
//! percentage.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::{ConfigError, ConfigResult};
use crate::clock::{Clock, SystemClock};

/// Minimum sleep granularity while waiting for a window to roll, so a
/// zero-length reset hint cannot spin the acquire loop.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Errors produced when quota cannot be granted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The bucket is exhausted and the limiter is in fail-fast mode.
    #[error("Quota exhausted for scope {scope} (retry after {retry_after:?})")]
    Exhausted {
        /// Scope whose bucket rejected the call
        scope: String,
        /// Time until the window resets
        retry_after: Duration,
    },

    /// The caller waited up to the configured maximum without quota freeing.
    #[error("Gave up waiting for quota on scope {scope} after {waited:?}")]
    WaitLimitReached {
        /// Scope whose bucket stayed exhausted
        scope: String,
        /// Total time spent suspended
        waited: Duration,
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl RateLimitError {
    /// Suggested delay before the next attempt has a chance of succeeding.
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Exhausted { retry_after, .. } | Self::WaitLimitReached { retry_after, .. } => {
                *retry_after
            }
        }
    }
}

/// Ceiling and reset window for one quota bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaBucketConfig {
    /// Calls permitted per window
    pub capacity: u32,
    /// Window length after which the used-count resets
    pub window: Duration,
}

impl QuotaBucketConfig {
    /// Bucket permitting `capacity` calls per `window`.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::new("bucket capacity must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::new("bucket window must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for QuotaBucketConfig {
    fn default() -> Self {
        Self { capacity: 100, window: Duration::from_secs(60) }
    }
}

/// Limiter-wide behavior knobs.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Ceiling applied to scopes without an explicit override
    pub default_bucket: QuotaBucketConfig,
    /// Reject immediately instead of suspending when a bucket is exhausted
    pub fail_fast: bool,
    /// Upper bound on how long one `acquire` may stay suspended
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_bucket: QuotaBucketConfig::default(),
            fail_fast: false,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RateLimiterConfig {
    /// Start building a limiter configuration.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        self.default_bucket.validate()?;
        if !self.fail_fast && self.max_wait.is_zero() {
            return Err(ConfigError::new("max_wait must be greater than 0 in waiting mode"));
        }
        Ok(())
    }
}

/// Builder for [`RateLimiterConfig`].
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    /// Ceiling applied to scopes without an explicit override.
    pub fn default_bucket(mut self, capacity: u32, window: Duration) -> Self {
        self.config.default_bucket = QuotaBucketConfig::new(capacity, window);
        self
    }

    /// Reject immediately instead of waiting for the window to roll.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Upper bound on how long one `acquire` may stay suspended.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time reading of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketUsage {
    /// Calls consumed in the current window
    pub used: u32,
    /// Calls permitted per window
    pub capacity: u32,
    /// Time until the current window resets
    pub resets_in: Duration,
}

impl BucketUsage {
    /// True once the bucket will reject further calls this window.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.capacity
    }
}

/// One scope's quota window: atomic used-count plus the window start.
struct QuotaBucket<C: Clock> {
    capacity: u32,
    window: Duration,
    used: AtomicU32,
    window_start: RwLock<Instant>,
    clock: C,
}

impl<C: Clock> QuotaBucket<C> {
    fn new(config: QuotaBucketConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            capacity: config.capacity,
            window: config.window,
            used: AtomicU32::new(0),
            window_start: RwLock::new(now),
            clock,
        }
    }

    /// Reset the used-count when at least one full window has elapsed. The
    /// window start advances by whole windows so boundaries never drift.
    fn roll_window(&self) {
        let now = self.clock.now();
        let start = *read_lock(&self.window_start);
        if now.saturating_duration_since(start) < self.window {
            return;
        }

        let mut guard = write_lock(&self.window_start);
        // Re-check under the write lock; a racing caller may have rolled.
        let elapsed = now.saturating_duration_since(*guard);
        if elapsed < self.window {
            return;
        }
        let periods = (elapsed.as_millis() / self.window.as_millis()).clamp(1, u128::from(u32::MAX));
        *guard += self.window * periods as u32;
        self.used.store(0, Ordering::Release);
    }

    /// Take one unit of quota, or report how long until the window resets.
    fn try_acquire(&self) -> Result<(), Duration> {
        self.roll_window();

        let mut current = self.used.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return Err(self.time_to_reset());
            }
            match self.used.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn time_to_reset(&self) -> Duration {
        let now = self.clock.now();
        let start = *read_lock(&self.window_start);
        (start + self.window).saturating_duration_since(now)
    }

    /// Overwrite local accounting with an authoritative platform reading.
    fn resync(&self, used_pct: f64, resets_in: Option<Duration>) {
        let pct = used_pct.clamp(0.0, 200.0);
        let used = ((pct / 100.0) * f64::from(self.capacity)).round() as u32;
        self.used.store(used.min(self.capacity), Ordering::Release);

        if let Some(resets_in) = resets_in {
            let resets_in = resets_in.min(self.window);
            let behind = self.window.saturating_sub(resets_in);
            let now = self.clock.now();
            let mut guard = write_lock(&self.window_start);
            *guard = now.checked_sub(behind).unwrap_or(now);
        }
    }

    fn usage(&self) -> BucketUsage {
        self.roll_window();
        BucketUsage {
            used: self.used.load(Ordering::Acquire),
            capacity: self.capacity,
            resets_in: self.time_to_reset(),
        }
    }
}

/// Keyed registry of quota buckets, one per scope.
///
/// Cheap to share behind an `Arc`; all interior state is per-bucket, so
/// concurrent callers on different scopes never contend.
pub struct RateLimiter<K, C: Clock = SystemClock>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    buckets: DashMap<K, std::sync::Arc<QuotaBucket<C>>>,
    overrides: DashMap<K, QuotaBucketConfig>,
    config: RateLimiterConfig,
    clock: C,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Limiter on the system clock.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<K, C> RateLimiter<K, C>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    /// Limiter on an explicit clock (tests use [`MockClock`]).
    ///
    /// [`MockClock`]: crate::clock::MockClock
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Self {
        Self { buckets: DashMap::new(), overrides: DashMap::new(), config, clock }
    }

    /// Install a scope-specific ceiling, replacing any accumulated state for
    /// that scope.
    pub fn set_ceiling(&self, key: K, capacity: u32, window: Duration) {
        let bucket_config = QuotaBucketConfig::new(capacity, window);
        self.overrides.insert(key.clone(), bucket_config.clone());
        self.buckets
            .insert(key, std::sync::Arc::new(QuotaBucket::new(bucket_config, self.clock.clone())));
    }

    /// Take one unit of quota for `key`, suspending until the window rolls
    /// when the bucket is exhausted (unless fail-fast is configured).
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exhausted`] in fail-fast mode, or
    /// [`RateLimitError::WaitLimitReached`] once the configured maximum wait
    /// has been spent suspended.
    pub async fn acquire(&self, key: &K) -> Result<(), RateLimitError> {
        let bucket = self.bucket(key);
        let mut waited = Duration::ZERO;

        loop {
            match bucket.try_acquire() {
                Ok(()) => return Ok(()),
                Err(retry_after) => {
                    if self.config.fail_fast {
                        return Err(RateLimitError::Exhausted {
                            scope: key.to_string(),
                            retry_after,
                        });
                    }
                    let wait = retry_after.max(MIN_WAIT);
                    if waited + wait > self.config.max_wait {
                        return Err(RateLimitError::WaitLimitReached {
                            scope: key.to_string(),
                            waited,
                            retry_after,
                        });
                    }
                    debug!(
                        scope = %key,
                        wait_ms = wait.as_millis() as u64,
                        "quota exhausted; waiting for window reset"
                    );
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Non-suspending variant of [`acquire`](Self::acquire): grants or fails
    /// with [`RateLimitError::Exhausted`] immediately.
    pub fn try_acquire(&self, key: &K) -> Result<(), RateLimitError> {
        self.bucket(key).try_acquire().map_err(|retry_after| RateLimitError::Exhausted {
            scope: key.to_string(),
            retry_after,
        })
    }

    /// Overwrite local accounting for `key` with an authoritative platform
    /// reading (consumption percentage plus optional reset hint).
    pub fn resync(&self, key: &K, used_pct: f64, resets_in: Option<Duration>) {
        debug!(scope = %key, used_pct, "resynchronizing quota bucket to platform reading");
        self.bucket(key).resync(used_pct, resets_in);
    }

    /// Point-in-time usage for `key`, if the scope has been seen.
    pub fn usage(&self, key: &K) -> Option<BucketUsage> {
        self.buckets.get(key).map(|bucket| bucket.usage())
    }

    /// Drop accumulated state for every scope.
    pub fn reset_all(&self) {
        self.buckets.clear();
    }

    fn bucket(&self, key: &K) -> std::sync::Arc<QuotaBucket<C>> {
        if let Some(existing) = self.buckets.get(key) {
            return std::sync::Arc::clone(existing.value());
        }
        let config = self
            .overrides
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.config.default_bucket.clone());
        let created = std::sync::Arc::new(QuotaBucket::new(config, self.clock.clone()));
        let entry = self.buckets.entry(key.clone()).or_insert(created);
        std::sync::Arc::clone(entry.value())
    }
}

impl<K, C> fmt::Debug for RateLimiter<K, C>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    C: Clock + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("scopes", &self.buckets.len())
            .field("fail_fast", &self.config.fail_fast)
            .finish()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
