//! Clock abstraction for testable time-dependent code
//!
//! Every primitive that reasons about elapsed time (circuit breaker
//! cooldowns, quota windows, token expiry) is generic over [`Clock`] so tests
//! can drive time deterministically with [`MockClock`] instead of sleeping.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Wall-clock time for timestamps that leave the process.
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the Unix epoch, saturating at zero for clocks set
    /// before the epoch.
    fn millis_since_epoch(&self) -> u64 {
        self.system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same underlying elapsed counter, so a clone handed to a
/// primitive under test observes every `advance` made on the original.
#[derive(Debug)]
pub struct MockClock {
    start: Instant,
    base: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            base: SystemTime::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += delta;
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance_millis(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Set the total elapsed duration since creation.
    pub fn set_elapsed(&self, elapsed: Duration) {
        let mut guard = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = elapsed;
    }

    /// Total duration the clock has been advanced.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockClock {
    fn clone(&self) -> Self {
        Self { start: self.start, base: self.base, elapsed: Arc::clone(&self.elapsed) }
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.base + self.elapsed()
    }
}
