//! Blocking memoization façade
//!
//! [`Memoized`] wraps a synchronous computation. It is a cheap `Clone`
//! handle and can be shared between threads; concurrent calls for one cold
//! key run the computation once while the other threads wait for it.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::coordinator::{BlockingFlights, Role};
use super::expiration::CachedItem;
use super::key::{CacheKey, KeyBuilder};
use super::params::CacheParameters;
use super::registry::{register_sync, SyncCacheHandle};
use super::stats::{CacheInfo, MetricsCollector};
use super::store::{CacheEntry, EntryStore};
use super::tree::ValueTree;
use crate::error::{BoxError, MemoError, MemoResult};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::time::{Clock, SystemClock};

type Computation<A, T> = Box<dyn Fn(&A) -> Result<T, BoxError> + Send + Sync>;

/// A memoized blocking computation
pub struct Memoized<A: ?Sized, T> {
    inner: Arc<SyncCache<A, T>>,
}

struct SyncCache<A: ?Sized, T> {
    params: CacheParameters<T>,
    keys: KeyBuilder,
    store: EntryStore<T>,
    metrics: MetricsCollector,
    flights: BlockingFlights<T>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    compute: Computation<A, T>,
}

impl<A, T> Memoized<A, T>
where
    A: Serialize + ?Sized + 'static,
    T: ValueTree + Clone + Send + Sync + 'static,
{
    /// Wrap `compute` using the system clock
    ///
    /// # Errors
    ///
    /// Fails with [`MemoError::Configuration`] if the parameters are invalid
    /// or need an async runtime (exit stacks, async expiration callbacks).
    pub fn new<F, E>(params: CacheParameters<T>, compute: F) -> MemoResult<Self>
    where
        F: Fn(&A) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::with_clock(params, Arc::new(SystemClock), compute)
    }

    /// Wrap `compute`, reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Configuration`] if the parameters are invalid.
    pub fn with_clock<F, E>(
        params: CacheParameters<T>,
        clock: Arc<dyn Clock>,
        compute: F,
    ) -> MemoResult<Self>
    where
        F: Fn(&A) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let mut problems = match params.validate() {
            Ok(()) => Vec::new(),
            Err(MemoError::Configuration { messages }) => messages,
            Err(other) => return Err(other),
        };
        if params.wrap_async_exit_stack.is_enabled() || params.exit_stack_close_delay.is_some() {
            problems.push("exit stack parameters can only be used with async functions".into());
        }
        if params.expiration.is_async() || params.negative_expiration.is_async() {
            problems.push("async expiration callbacks can only be used with async functions".into());
        }
        if let Some(error) = MemoError::merge_configuration(problems) {
            return Err(error);
        }

        let inner = Arc::new(SyncCache {
            keys: KeyBuilder::new(&params.key)?,
            store: EntryStore::new(params.maxsize),
            metrics: MetricsCollector::default(),
            flights: BlockingFlights::new(),
            retry: RetryExecutor::new(RetryConfig::from_backoff_seconds(
                params.retry_count,
                params.backoff_in_seconds,
            )),
            clock,
            compute: Box::new(move |args: &A| compute(args).map_err(Into::into)),
            params,
        });

        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn SyncCacheHandle> = weak;
        register_sync(handle);
        Ok(Self { inner })
    }

    /// Return the memoized result for `args`, computing it if needed
    ///
    /// # Errors
    ///
    /// Returns the computation failure after retries, a cached failure when
    /// negative caching is on, or a key or expiration error.
    pub fn call(&self, args: &A) -> MemoResult<T> {
        let cache = &self.inner;
        if cache.params.bypasses_cache() {
            cache.metrics.record_miss();
            return cache.run_once(args);
        }

        let key = cache.keys.build(args)?;
        let now = cache.clock.now();
        cache.auto_remove_expired(now);

        if let Some(outcome) = cache.lookup(&key, now)? {
            cache.metrics.record_hit();
            return outcome;
        }

        match cache.flights.join(&key) {
            Role::Follower(flight) => {
                let outcome = flight.wait();
                cache.metrics.record_hit();
                outcome
            }
            Role::Leader(guard) => {
                let outcome = cache.lead(&key, args);
                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Run the computation once, bypassing the cache and its statistics
    ///
    /// # Errors
    ///
    /// Returns the computation failure after retries.
    pub fn uncached(&self, args: &A) -> MemoResult<T> {
        self.inner.run_once(args)
    }

    /// Remove every entry and reset hit and miss counters
    pub fn clear_cache(&self) {
        self.inner.clear();
    }

    /// Remove expired entries without recomputing them
    ///
    /// Returns the number of entries removed.
    #[must_use]
    pub fn remove_expired(&self) -> usize {
        let now = self.inner.clock.now();
        self.inner.metrics.mark_swept(now);
        self.inner.sweep(now)
    }

    /// Statistics snapshot
    #[must_use]
    pub fn cache_info(&self) -> CacheInfo {
        self.inner.info()
    }

    /// The parameters this cache was built with
    #[must_use]
    pub fn cache_parameters(&self) -> CacheParameters<T> {
        self.inner.params.clone()
    }
}

impl<A: ?Sized, T> SyncCache<A, T>
where
    T: ValueTree + Clone + Send + Sync + 'static,
{
    fn run_once(&self, args: &A) -> MemoResult<T> {
        (self.compute)(args).map_err(|source| MemoError::computation(1, source))
    }

    /// The stored outcome for `key`, unless it is missing or expired
    fn lookup(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> MemoResult<Option<MemoResult<T>>> {
        let Some(entry) = self.store.get(key) else {
            return Ok(None);
        };
        if entry.expiration.evaluate_blocking(&entry.item, now)?.is_expired() {
            trace!(key = %key, "Cached entry expired");
            return Ok(None);
        }
        Ok(Some(entry.item.outcome.to_result()))
    }

    /// Leader path: re-check, then compute and store
    fn lead(&self, key: &CacheKey, args: &A) -> MemoResult<T> {
        if let Some(outcome) = self.lookup(key, self.clock.now())? {
            self.metrics.record_hit();
            return outcome;
        }

        self.metrics.record_miss();
        debug!(key = %key, "Computing cache entry");
        let computed = self.retry.execute_blocking(|| (self.compute)(args));
        let fetched_at = self.clock.now();

        match computed {
            Ok(value) => {
                let item = CachedItem::value(value.clone(), fetched_at);
                let entry = CacheEntry::new(item, self.params.expiration.clone(), None);
                self.store.put(key.clone(), Arc::new(entry));
                Ok(value)
            }
            Err(exhausted) => {
                let error = MemoError::computation(exhausted.attempts, exhausted.last_error);
                if self.params.negative_cache {
                    debug!(key = %key, error = %error, "Caching failed computation");
                    let item = CachedItem::error(error.clone(), fetched_at);
                    let entry = CacheEntry::new(item, self.params.negative_expiration.clone(), None);
                    self.store.put(key.clone(), Arc::new(entry));
                }
                Err(error)
            }
        }
    }

    fn auto_remove_expired(&self, now: DateTime<Utc>) {
        if let Some(period) = self.params.expired_items_auto_removal_period {
            if self.metrics.claim_sweep(now, period) {
                let removed = self.sweep(now);
                trace!(removed, "Periodic expired entry sweep");
            }
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for (key, entry) in self.store.snapshot() {
            let expired = match entry.expiration.evaluate_blocking(&entry.item, now) {
                Ok(decision) => decision.is_expired(),
                Err(error) => {
                    warn!(key = %key, error = %error, "Removing entry with unresolvable expiration");
                    true
                }
            };
            if expired && self.store.remove_if_same(&key, &entry) {
                removed += 1;
            }
        }
        removed
    }

    fn info(&self) -> CacheInfo {
        self.metrics.snapshot(self.params.maxsize, self.store.len())
    }
}

impl<A: ?Sized, T> SyncCacheHandle for SyncCache<A, T>
where
    T: Send + Sync,
{
    fn clear(&self) {
        let drained = self.store.drain();
        self.metrics.reset();
        debug!(entries = drained.len(), "Cache cleared");
    }
}

impl<A: ?Sized, T> Clone for Memoized<A, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A: ?Sized, T> fmt::Debug for Memoized<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("params", &self.inner.params)
            .field("entries", &self.inner.store.len())
            .field("in_flight", &self.inner.flights.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::memoized.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::cache::exit_stack::ExitStackMode;
    use crate::cache::expiration::Expiration;
    use crate::time::MockClock;

    fn counting(calls: &Arc<AtomicU32>) -> impl Fn(&u32) -> Result<u32, std::io::Error> {
        let calls = Arc::clone(calls);
        move |n: &u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(n * 10)
        }
    }

    /// Validates `Memoized::call` behavior for the repeated argument
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the computation runs once per distinct argument.
    /// - Confirms hits and misses are counted.
    #[test]
    fn test_call_memoizes_per_argument() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = Memoized::new(CacheParameters::default(), counting(&calls)).unwrap();

        assert_eq!(cache.call(&1).unwrap(), 10);
        assert_eq!(cache.call(&1).unwrap(), 10);
        assert_eq!(cache.call(&2).unwrap(), 20);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let info = cache.cache_info();
        assert_eq!((info.hits, info.misses, info.current_size), (1, 2, 2));
    }

    /// Validates the bypass switches.
    ///
    /// Assertions:
    /// - Confirms a disabled cache recomputes every call and counts misses.
    /// - Confirms `maxsize(0)` behaves the same.
    #[test]
    fn test_disabled_cache_always_computes() {
        for params in [
            CacheParameters::builder().enabled(false).build().unwrap(),
            CacheParameters::builder().maxsize(0).build().unwrap(),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let cache = Memoized::new(params, counting(&calls)).unwrap();
            cache.call(&1).unwrap();
            cache.call(&1).unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(cache.cache_info().misses, 2);
            assert_eq!(cache.cache_info().current_size, 0);
        }
    }

    /// Validates construction-time rejection of async-only options.
    ///
    /// Assertions:
    /// - Confirms exit stack parameters are rejected with the documented
    ///   message.
    /// - Confirms async expiration callbacks are rejected.
    #[test]
    fn test_rejects_async_only_parameters() {
        let params = CacheParameters::<u32>::builder()
            .wrap_async_exit_stack(ExitStackMode::WholeValue)
            .build()
            .unwrap();
        match Memoized::new(params, |n: &u32| Ok::<_, std::io::Error>(*n)) {
            Err(MemoError::Configuration { messages }) => assert_eq!(
                messages,
                vec!["exit stack parameters can only be used with async functions".to_string()]
            ),
            other => panic!("expected configuration error, got {other:?}"),
        }

        let params = CacheParameters::<u32>::builder()
            .expiration(Expiration::<u32>::async_callback(|_| async { Expiration::Never }))
            .build()
            .unwrap();
        assert!(Memoized::new(params, |n: &u32| Ok::<_, std::io::Error>(*n)).is_err());
    }

    /// Validates that an unparseable expiration fails construction.
    ///
    /// Assertions:
    /// - Confirms `Memoized::new` reports `MemoError::Configuration`.
    /// - Ensures the computation never runs.
    #[test]
    fn test_unparseable_expiration_fails_construction() {
        let calls = Arc::new(AtomicU32::new(0));
        let params = CacheParameters {
            expiration: Expiration::from("10 minuts"),
            ..CacheParameters::default()
        };

        let result = Memoized::new(params, counting(&calls));

        assert!(matches!(result, Err(MemoError::Configuration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Validates expiration and `remove_expired` with a mock clock.
    ///
    /// Assertions:
    /// - Confirms an entry is recomputed once its interval has elapsed.
    /// - Confirms `remove_expired` removes only expired entries and records
    ///   the sweep time.
    #[test]
    fn test_expiration_and_remove_expired() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let params = CacheParameters::builder()
            .expiration(Expiration::callback(|item: &CachedItem<u32>| {
                if item.get() == Some(&10) {
                    Expiration::Every(Duration::from_secs(60))
                } else {
                    Expiration::Never
                }
            }))
            .build()
            .unwrap();
        let cache = Memoized::with_clock(params, Arc::new(clock.clone()), counting(&calls)).unwrap();

        cache.call(&1).unwrap();
        cache.call(&2).unwrap();
        clock.advance(Duration::from_secs(60));

        assert_eq!(cache.remove_expired(), 1);
        let info = cache.cache_info();
        assert_eq!(info.current_size, 1);
        assert_eq!(info.last_expiration_check, Some(clock.now()));

        cache.call(&1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Validates `clear_cache` and `uncached`.
    ///
    /// Assertions:
    /// - Confirms clearing empties the store and resets counters.
    /// - Confirms `uncached` runs the computation without touching stats.
    #[test]
    fn test_clear_cache_and_uncached() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = Memoized::new(CacheParameters::default(), counting(&calls)).unwrap();
        cache.call(&1).unwrap();
        cache.call(&1).unwrap();

        cache.clear_cache();
        let info = cache.cache_info();
        assert_eq!((info.hits, info.misses, info.current_size), (0, 0, 0));

        assert_eq!(cache.uncached(&3).unwrap(), 30);
        assert_eq!(cache.cache_info().misses, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(format!("{cache:?}").contains("in_flight: 0"));
    }

    /// Validates that non-finite float arguments never share an entry.
    ///
    /// Assertions:
    /// - Confirms `NaN` and the infinities fail with `KeyFormatting`.
    /// - Ensures nothing is computed or stored for them.
    #[test]
    fn test_non_finite_arguments_are_rejected() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cache = Memoized::new(CacheParameters::default(), move |x: &f64| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(x.to_string())
        })
        .unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(cache.call(&value), Err(MemoError::KeyFormatting { .. })));
        }
        assert_eq!(cache.call(&2.5).unwrap(), "2.5");

        let info = cache.cache_info();
        assert_eq!((info.hits, info.misses, info.current_size), (0, 1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates failure propagation without negative caching.
    ///
    /// Assertions:
    /// - Confirms each call retries and reports the attempt count.
    /// - Ensures failures are not stored.
    #[test]
    fn test_failures_without_negative_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let params = CacheParameters::builder().retry_count(2).build().unwrap();
        let cache = Memoized::new(params, move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(std::io::Error::other("down"))
        })
        .unwrap();

        let error = cache.call("x").unwrap_err();
        assert_eq!(error.attempts(), Some(3));
        assert!(cache.call("x").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(cache.cache_info().current_size, 0);
    }
}
