//! Async memoization façade
//!
//! [`AsyncMemoized`] wraps a computation returning a future. Concurrent
//! callers of one cold key share a single spawned computation, so dropping
//! a caller's future never cancels the work other callers wait for.
//!
//! When configured with an [`ExitStackMode`](super::ExitStackMode), the
//! resources inside each computed value are entered once and released when
//! the value leaves the cache. A renewed value releases its predecessor's
//! resources before entering its own. Evicted entries and entries swept on
//! a call are released in the background; clearing the cache or removing
//! expired entries explicitly releases inline.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::coordinator::AsyncFlights;
use super::exit_stack::{ExitStack, ReleaseTracker};
use super::expiration::CachedItem;
use super::key::{CacheKey, KeyBuilder};
use super::params::CacheParameters;
use super::registry::{register_async, AsyncCacheHandle};
use super::stats::{CacheInfo, MetricsCollector};
use super::store::{CacheEntry, EntryStore, SharedEntry};
use super::tree::ValueTree;
use crate::error::{BoxError, MemoError, MemoResult};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::time::{Clock, SystemClock};

type AsyncComputation<A, T> =
    Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// A memoized async computation
pub struct AsyncMemoized<A, T> {
    inner: Arc<AsyncCache<A, T>>,
}

struct AsyncCache<A, T> {
    params: CacheParameters<T>,
    keys: KeyBuilder,
    store: EntryStore<T>,
    metrics: MetricsCollector,
    flights: Arc<AsyncFlights<T>>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    releases: ReleaseTracker,
    compute: AsyncComputation<A, T>,
}

impl<A, T> AsyncMemoized<A, T>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: ValueTree + Clone + Send + Sync + 'static,
{
    /// Wrap `compute` using the system clock
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Configuration`] if the parameters are invalid.
    pub fn new<F, Fut, E>(params: CacheParameters<T>, compute: F) -> MemoResult<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_clock(params, Arc::new(SystemClock), compute)
    }

    /// Wrap `compute`, reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Configuration`] if the parameters are invalid.
    pub fn with_clock<F, Fut, E>(
        params: CacheParameters<T>,
        clock: Arc<dyn Clock>,
        compute: F,
    ) -> MemoResult<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        params.validate()?;

        let compute: AsyncComputation<A, T> = Arc::new(move |args: A| {
            let pending = compute(args);
            async move { pending.await.map_err(Into::into) }.boxed()
        });

        let inner = Arc::new(AsyncCache {
            keys: KeyBuilder::new(&params.key)?,
            store: EntryStore::new(params.maxsize),
            metrics: MetricsCollector::default(),
            flights: Arc::new(AsyncFlights::new()),
            retry: RetryExecutor::new(RetryConfig::from_backoff_seconds(
                params.retry_count,
                params.backoff_in_seconds,
            )),
            clock,
            releases: ReleaseTracker::new(),
            compute,
            params,
        });

        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn AsyncCacheHandle> = weak;
        register_async(handle);
        Ok(Self { inner })
    }

    /// Return the memoized result for `args`, computing it if needed
    ///
    /// # Errors
    ///
    /// Returns the computation failure after retries, a cached failure when
    /// negative caching is on, or a key, expiration or resource error.
    pub async fn call(&self, args: A) -> MemoResult<T> {
        let cache = &self.inner;
        if cache.params.bypasses_cache() {
            cache.metrics.record_miss();
            return cache.run_once(args).await;
        }

        let key = cache.keys.build(&args)?;
        let now = cache.clock.now();
        cache.auto_remove_expired(now).await;

        if let Some(outcome) = cache.lookup(&key, now).await? {
            cache.metrics.record_hit();
            return outcome;
        }

        let leader = Arc::clone(cache);
        let flight_key = key.clone();
        let (started, flight) =
            cache.flights.join(&key, move || leader.lead(flight_key, args).boxed());
        if !started {
            cache.metrics.record_hit();
        }
        flight.await
    }

    /// Run the computation once, bypassing the cache and its statistics
    ///
    /// Resources in the result are not entered.
    ///
    /// # Errors
    ///
    /// Returns the computation failure after retries.
    pub async fn uncached(&self, args: A) -> MemoResult<T> {
        self.inner.run_once(args).await
    }

    /// Remove every entry, release their resources and reset counters
    ///
    /// Every exit stack is released even if an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first resource release failure.
    pub async fn clear_cache(&self) -> MemoResult<()> {
        self.inner.clear_entries().await
    }

    /// Remove expired entries, releasing their resources inline
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns the first resource release failure.
    pub async fn remove_expired(&self) -> MemoResult<usize> {
        let now = self.inner.clock.now();
        self.inner.metrics.mark_swept(now);
        let removed = self.inner.sweep(now).await;
        let count = removed.len();
        release_all(removed).await.map(|()| count)
    }

    /// Statistics snapshot
    #[must_use]
    pub fn cache_info(&self) -> CacheInfo {
        self.inner.metrics.snapshot(self.inner.params.maxsize, self.inner.store.len())
    }

    /// The parameters this cache was built with
    #[must_use]
    pub fn cache_parameters(&self) -> CacheParameters<T> {
        self.inner.params.clone()
    }

    /// Wait for this cache's background releases scheduled so far
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::ReleaseTimeout`] when `timeout` elapses first.
    pub async fn await_exit_stack_close_operations(
        &self,
        timeout: Option<Duration>,
    ) -> MemoResult<()> {
        self.inner.releases.wait(timeout).await
    }

    /// Cancel this cache's background releases scheduled so far
    pub fn cancel_exit_stack_close_operations(&self) {
        self.inner.releases.cancel();
    }
}

impl<A, T> AsyncCache<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: ValueTree + Clone + Send + Sync + 'static,
{
    async fn run_once(&self, args: A) -> MemoResult<T> {
        (self.compute)(args).await.map_err(|source| MemoError::computation(1, source))
    }

    async fn lookup(&self, key: &CacheKey, now: DateTime<Utc>) -> MemoResult<Option<MemoResult<T>>> {
        let Some(entry) = self.store.get(key) else {
            return Ok(None);
        };
        if entry.expiration.evaluate(&entry.item, now).await?.is_expired() {
            trace!(key = %key, "Cached entry expired");
            return Ok(None);
        }
        Ok(Some(entry.item.outcome.to_result()))
    }

    /// Leader task: re-check, then compute, wrap and store
    async fn lead(self: Arc<Self>, key: CacheKey, args: A) -> MemoResult<T> {
        if let Some(outcome) = self.lookup(&key, self.clock.now()).await? {
            self.metrics.record_hit();
            return outcome;
        }

        self.metrics.record_miss();
        debug!(key = %key, "Computing cache entry");
        let stale = self.store.peek(&key);
        let mut retired = None;
        let outcome = match self.compute_with_retry(&args).await {
            Ok(value) => {
                retired = self.retire(stale).await;
                ExitStack::wrap(&value, &self.params.wrap_async_exit_stack)
                    .await
                    .map(|stack| (value, stack.map(Arc::new)))
            }
            Err(error) => Err(error),
        };
        let fetched_at = self.clock.now();

        match outcome {
            Ok((value, stack)) => {
                let item = CachedItem::value(value.clone(), fetched_at);
                let entry = CacheEntry::new(item, self.params.expiration.clone(), stack);
                self.replace(key, entry, retired.as_ref());
                Ok(value)
            }
            Err(error) => {
                if self.params.negative_cache {
                    debug!(key = %key, error = %error, "Caching failed computation");
                    let item = CachedItem::error(error.clone(), fetched_at);
                    let expiration = self.params.negative_expiration.clone();
                    self.replace(key, CacheEntry::new(item, expiration, None), retired.as_ref());
                }
                Err(error)
            }
        }
    }

    async fn compute_with_retry(&self, args: &A) -> MemoResult<T> {
        let compute = &self.compute;
        self.retry
            .execute(|| compute(args.clone()))
            .await
            .map_err(|exhausted| MemoError::computation(exhausted.attempts, exhausted.last_error))
    }

    /// Release the resources of the entry a fresh value is about to replace
    ///
    /// Runs before the fresh value's resources are entered. Without a close
    /// delay the old stack is released inline; with one it is scheduled.
    /// Returns the entry whose stack was handled so `replace` skips it.
    async fn retire(&self, stale: Option<SharedEntry<T>>) -> Option<SharedEntry<T>> {
        let entry = stale?;
        let stack = Arc::clone(entry.exit_stack()?);
        match self.params.exit_stack_close_delay {
            Some(delay) => self.releases.schedule(stack, Some(delay)),
            None => {
                if let Err(error) = stack.release().await {
                    warn!(error = %error, "Failed to release replaced exit stack");
                }
            }
        }
        Some(entry)
    }

    /// Store `entry`, scheduling release of whatever it displaced
    fn replace(&self, key: CacheKey, entry: CacheEntry<T>, retired: Option<&SharedEntry<T>>) {
        let mut displaced = self.store.put(key, Arc::new(entry));
        displaced.retain(|old| !retired.is_some_and(|done| Arc::ptr_eq(done, old)));
        self.schedule_release(displaced);
    }

    fn schedule_release(&self, entries: Vec<SharedEntry<T>>) {
        for entry in entries {
            if let Some(stack) = entry.exit_stack() {
                self.releases.schedule(Arc::clone(stack), self.params.exit_stack_close_delay);
            }
        }
    }

    async fn auto_remove_expired(&self, now: DateTime<Utc>) {
        if let Some(period) = self.params.expired_items_auto_removal_period {
            if self.metrics.claim_sweep(now, period) {
                let removed = self.sweep(now).await;
                trace!(removed = removed.len(), "Periodic expired entry sweep");
                self.schedule_release(removed);
            }
        }
    }

    /// Remove expired entries and hand them back for release
    async fn sweep(&self, now: DateTime<Utc>) -> Vec<SharedEntry<T>> {
        let mut removed = Vec::new();
        for (key, entry) in self.store.snapshot() {
            let expired = match entry.expiration.evaluate(&entry.item, now).await {
                Ok(decision) => decision.is_expired(),
                Err(error) => {
                    warn!(key = %key, error = %error, "Removing entry with unresolvable expiration");
                    true
                }
            };
            if expired && self.store.remove_if_same(&key, &entry) {
                removed.push(entry);
            }
        }
        removed
    }

    async fn clear_entries(&self) -> MemoResult<()> {
        let drained = self.store.drain();
        self.metrics.reset();
        debug!(entries = drained.len(), "Cache cleared");
        release_all(drained).await
    }
}

/// Release every exit stack, returning the first failure
async fn release_all<T: Send + Sync>(entries: Vec<SharedEntry<T>>) -> MemoResult<()> {
    let mut first_error = None;
    for entry in entries {
        if let Some(stack) = entry.exit_stack() {
            if let Err(error) = stack.release().await {
                first_error.get_or_insert(error);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[async_trait]
impl<A, T> AsyncCacheHandle for AsyncCache<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: ValueTree + Clone + Send + Sync + 'static,
{
    async fn clear(&self) -> MemoResult<()> {
        self.clear_entries().await
    }
}

impl<A, T> Clone for AsyncMemoized<A, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A, T> fmt::Debug for AsyncMemoized<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemoized")
            .field("params", &self.inner.params)
            .field("entries", &self.inner.store.len())
            .field("in_flight", &self.inner.flights.len())
            .field("pending_releases", &self.inner.releases.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::async_memoized.

    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{json, Value};

    use super::*;
    use crate::cache::expiration::Expiration;
    use crate::time::MockClock;

    /// Validates `AsyncMemoized::call` behavior for the repeated argument
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the computation runs once per key.
    /// - Confirms hit and miss counters.
    #[tokio::test]
    async fn test_call_memoizes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cache = AsyncMemoized::new(CacheParameters::default(), move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(n + 1)
            }
        })
        .unwrap();

        assert_eq!(cache.call(1).await.unwrap(), 2);
        assert_eq!(cache.call(1).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let info = cache.cache_info();
        assert_eq!((info.hits, info.misses), (1, 1));
    }

    /// Validates async expiration callbacks on the async façade.
    ///
    /// Assertions:
    /// - Confirms an async callback is awaited during lookup.
    /// - Confirms the entry is recomputed after the callback's deadline.
    #[tokio::test]
    async fn test_async_expiration_callback() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let params = CacheParameters::builder()
            .expiration(Expiration::async_callback(|item: CachedItem<Value>| async move {
                match item.get().and_then(|value| value["ttl"].as_u64()) {
                    Some(ttl) => Expiration::Every(Duration::from_secs(ttl)),
                    None => Expiration::Never,
                }
            }))
            .build()
            .unwrap();
        let cache = AsyncMemoized::with_clock(params, Arc::new(clock.clone()), move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(json!({"ttl": 5}))
            }
        })
        .unwrap();

        cache.call(()).await.unwrap();
        clock.advance(Duration::from_secs(4));
        cache.call(()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        cache.call(()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Validates negative caching with the default expiration.
    ///
    /// Assertions:
    /// - Confirms the cached failure is returned without recomputing.
    /// - Confirms the failure expires after ten seconds.
    #[tokio::test]
    async fn test_negative_cache_default_expiration() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let params = CacheParameters::builder().negative_cache(true).build().unwrap();
        let cache = AsyncMemoized::with_clock(params, Arc::new(clock.clone()), move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(std::io::Error::other("unavailable"))
            }
        })
        .unwrap();

        assert!(cache.call(()).await.is_err());
        clock.advance(Duration::from_secs(9));
        assert!(matches!(cache.call(()).await, Err(MemoError::Computation { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        assert!(cache.call(()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
