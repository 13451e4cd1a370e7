//! Cache statistics
//!
//! A call is a hit when it was answered without running the computation on
//! its behalf: either from a valid entry or by joining a computation another
//! caller was already running. A call that ran the computation is a miss.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Point-in-time statistics for one cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    /// Calls answered without running the computation
    pub hits: u64,
    /// Calls that ran the computation
    pub misses: u64,
    /// Size bound (None = unlimited)
    pub maxsize: Option<usize>,
    /// Entries currently stored
    pub current_size: usize,
    /// When expired entries were last swept
    pub last_expiration_check: Option<DateTime<Utc>>,
}

impl CacheInfo {
    /// Calculate hit rate (hits / total calls)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free hit and miss counters plus the sweep timestamp
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    last_expiration_check: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsCollector {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset hit and miss counters; the sweep timestamp is kept
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn mark_swept(&self, at: DateTime<Utc>) {
        *self.last_expiration_check.lock() = Some(at);
    }

    /// Claim the next periodic sweep if `period` has elapsed since the last one
    pub fn claim_sweep(&self, now: DateTime<Utc>, period: std::time::Duration) -> bool {
        let Ok(period) = chrono::Duration::from_std(period) else {
            return false;
        };
        let mut last = self.last_expiration_check.lock();
        let due = last.map_or(true, |at| now - at >= period);
        if due {
            *last = Some(now);
        }
        drop(last);
        due
    }

    pub fn snapshot(&self, maxsize: Option<usize>, current_size: usize) -> CacheInfo {
        CacheInfo {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            maxsize,
            current_size,
            last_expiration_check: *self.last_expiration_check.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::stats.

    use std::time::Duration;

    use super::*;

    /// Validates counter recording and reset.
    ///
    /// Assertions:
    /// - Confirms hits and misses are counted independently.
    /// - Confirms `reset` zeroes both counters.
    /// - Confirms `hit_rate` on the snapshot.
    #[test]
    fn test_counters_and_reset() {
        let metrics = MetricsCollector::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        let info = metrics.snapshot(Some(10), 1);
        assert_eq!((info.hits, info.misses), (3, 1));
        assert!((info.hit_rate() - 0.75).abs() < f64::EPSILON);

        metrics.reset();
        let info = metrics.snapshot(Some(10), 1);
        assert_eq!((info.hits, info.misses), (0, 0));
        assert!(info.hit_rate().abs() < f64::EPSILON);
    }

    /// Validates periodic sweep claiming.
    ///
    /// Assertions:
    /// - Confirms the first claim succeeds.
    /// - Ensures a claim within the period fails.
    /// - Confirms a claim exactly one period later succeeds.
    #[test]
    fn test_claim_sweep_period() {
        let metrics = MetricsCollector::default();
        let start = Utc::now();
        let period = Duration::from_secs(60);

        assert!(metrics.claim_sweep(start, period));
        assert!(!metrics.claim_sweep(start + chrono::Duration::seconds(59), period));
        assert!(metrics.claim_sweep(start + chrono::Duration::seconds(60), period));
        assert_eq!(
            metrics.snapshot(None, 0).last_expiration_check,
            Some(start + chrono::Duration::seconds(60))
        );
    }
}
