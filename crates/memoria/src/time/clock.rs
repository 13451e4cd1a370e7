//! Time abstraction for testability
//!
//! The cache reads wall-clock time through [`Clock`] so expiration can be
//! tested deterministically without waiting.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use memoria::{Clock, MockClock, SystemClock};
//!
//! // Use system clock in production
//! let clock = SystemClock;
//! let _now = clock.now();
//!
//! // Use mock clock in tests
//! let mock = MockClock::new();
//! let start = mock.now();
//! mock.advance(Duration::from_secs(5));
//! assert_eq!((mock.now() - start).num_seconds(), 5);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Trait for time operations to enable testing
pub trait Clock: Send + Sync {
    /// Get the current wall-clock instant
    fn now(&self) -> DateTime<Utc>;

    /// Get milliseconds since UNIX epoch
    #[must_use]
    fn millis_since_epoch(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

impl fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").field("now", &self.now()).finish()
    }
}

/// Real system clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time, so a clock handed to a cache can be
/// advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: DateTime<Utc>,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock starting at the current real time
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a mock clock starting at a fixed instant
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { start, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.start.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::clock.

    use super::*;

    /// Validates `MockClock` behavior for the shared advance scenario.
    ///
    /// Assertions:
    /// - Confirms clones observe advances made through the original.
    /// - Confirms `set_elapsed` replaces the accumulated time.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let observer = clock.clone();
        let start = observer.now();

        clock.advance(Duration::from_secs(30));
        assert_eq!((observer.now() - start).num_seconds(), 30);

        clock.set_elapsed(Duration::from_secs(5));
        assert_eq!(observer.elapsed(), Duration::from_secs(5));
    }

    /// Validates `Clock::millis_since_epoch` behavior for a fixed start.
    ///
    /// Assertions:
    /// - Confirms the value matches the start instant in milliseconds.
    #[test]
    fn test_millis_since_epoch() {
        let start = DateTime::from_timestamp(1_000, 0).unwrap();
        let clock = MockClock::starting_at(start);
        assert_eq!(clock.millis_since_epoch(), 1_000_000);
    }

    /// Validates `SystemClock` behavior against `Utc::now`.
    ///
    /// Assertions:
    /// - Ensures the system clock does not run behind a prior reading.
    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let before = Utc::now();
        assert!(SystemClock.now() >= before);
    }
}
