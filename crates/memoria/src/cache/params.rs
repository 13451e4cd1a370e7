//! Cache configuration types and builder
//!
//! [`CacheParameters`] is the immutable construction-time snapshot of a
//! façade. It is assembled with [`CacheParametersBuilder`], whose `build`
//! validates every option and reports all problems in one
//! [`MemoError::Configuration`].
//!
//! # Example
//!
//! ```
//! use memoria::{CacheParameters, KeyStrategy};
//!
//! let params = CacheParameters::<String>::builder()
//!     .maxsize(1_000)
//!     .expiration("$.token.expiration")
//!     .negative_cache(true)
//!     .negative_expiration("30 seconds")
//!     .retry_count(3)
//!     .backoff_in_seconds(0.5)
//!     .key(KeyStrategy::Template("user:{0}".into()))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(params.maxsize, Some(1_000));
//! ```

use std::fmt;
use std::time::Duration;

use super::exit_stack::ExitStackMode;
use super::expiration::Expiration;
use super::key::{KeyBuilder, KeyStrategy};
use super::path::ResourcePath;
use crate::error::{MemoError, MemoResult};
use crate::time::parse_duration;

/// Default lifetime of a negatively cached failure
pub const DEFAULT_NEGATIVE_EXPIRATION: Duration = Duration::from_secs(10);

/// A duration given as a value, a number of seconds or a string
#[derive(Debug, Clone, PartialEq)]
pub enum DurationSpec {
    /// An exact duration
    Exact(Duration),
    /// Seconds, possibly fractional
    Seconds(f64),
    /// Any string [`parse_duration`] accepts
    Text(String),
}

impl DurationSpec {
    /// Convert to a `Duration`
    ///
    /// # Errors
    ///
    /// Returns a message describing a negative, non-finite or unparseable
    /// duration.
    pub fn resolve(&self) -> Result<Duration, String> {
        match self {
            Self::Exact(duration) => Ok(*duration),
            Self::Seconds(seconds) => Duration::try_from_secs_f64(*seconds)
                .map_err(|_| format!("{seconds} is not a valid number of seconds")),
            Self::Text(text) => parse_duration(text).map_err(|e| e.to_string()),
        }
    }
}

impl From<Duration> for DurationSpec {
    fn from(duration: Duration) -> Self {
        Self::Exact(duration)
    }
}

impl From<f64> for DurationSpec {
    fn from(seconds: f64) -> Self {
        Self::Seconds(seconds)
    }
}

impl From<u64> for DurationSpec {
    fn from(seconds: u64) -> Self {
        Self::Exact(Duration::from_secs(seconds))
    }
}

impl From<&str> for DurationSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for DurationSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Construction-time configuration of a memoized function
pub struct CacheParameters<T> {
    /// When false every call runs the computation directly
    pub enabled: bool,
    /// How keys are derived from arguments
    pub key: KeyStrategy,
    /// Maximum number of entries; `Some(0)` disables caching, `None` is
    /// unbounded
    pub maxsize: Option<usize>,
    /// Expiration applied to successful results
    pub expiration: Expiration<T>,
    /// Sweep expired entries on calls at most this often
    pub expired_items_auto_removal_period: Option<Duration>,
    /// Which parts of a result an async cache manages as resources
    pub wrap_async_exit_stack: ExitStackMode,
    /// Delay before a replaced or evicted exit stack is released
    pub exit_stack_close_delay: Option<Duration>,
    /// Cache failures as well as values
    pub negative_cache: bool,
    /// Expiration applied to cached failures
    pub negative_expiration: Expiration<T>,
    /// Extra attempts after the first failure
    pub retry_count: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff_in_seconds: f64,
}

impl<T> CacheParameters<T> {
    /// Create a configuration builder
    pub fn builder() -> CacheParametersBuilder<T> {
        CacheParametersBuilder::new()
    }

    /// Whether calls bypass the store entirely
    #[must_use]
    pub const fn bypasses_cache(&self) -> bool {
        !self.enabled || matches!(self.maxsize, Some(0))
    }

    /// Validate the configuration, collecting every problem
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Configuration`] listing every problem found.
    pub fn validate(&self) -> MemoResult<()> {
        let mut problems = Vec::new();

        if !self.backoff_in_seconds.is_finite() || self.backoff_in_seconds < 0.0 {
            problems.push(format!(
                "backoff_in_seconds must be a finite, non-negative number (got {})",
                self.backoff_in_seconds
            ));
        }
        if let Err(message) = self.expiration.validate() {
            problems.push(format!("expiration: {message}"));
        }
        if let Err(message) = self.negative_expiration.validate() {
            problems.push(format!("negative_expiration: {message}"));
        }
        if let Err(MemoError::Configuration { messages }) = KeyBuilder::new(&self.key) {
            problems.extend(messages);
        }
        if matches!(self.expired_items_auto_removal_period, Some(period) if period.is_zero()) {
            problems.push("expired_items_auto_removal_period must be positive".to_string());
        }

        MemoError::merge_configuration(problems).map_or(Ok(()), Err)
    }
}

impl<T> Default for CacheParameters<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            key: KeyStrategy::Hashed,
            maxsize: None,
            expiration: Expiration::Never,
            expired_items_auto_removal_period: None,
            wrap_async_exit_stack: ExitStackMode::Disabled,
            exit_stack_close_delay: None,
            negative_cache: false,
            negative_expiration: Expiration::Every(DEFAULT_NEGATIVE_EXPIRATION),
            retry_count: 0,
            backoff_in_seconds: 0.0,
        }
    }
}

impl<T> Clone for CacheParameters<T> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            key: self.key.clone(),
            maxsize: self.maxsize,
            expiration: self.expiration.clone(),
            expired_items_auto_removal_period: self.expired_items_auto_removal_period,
            wrap_async_exit_stack: self.wrap_async_exit_stack.clone(),
            exit_stack_close_delay: self.exit_stack_close_delay,
            negative_cache: self.negative_cache,
            negative_expiration: self.negative_expiration.clone(),
            retry_count: self.retry_count,
            backoff_in_seconds: self.backoff_in_seconds,
        }
    }
}

impl<T> PartialEq for CacheParameters<T> {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.key == other.key
            && self.maxsize == other.maxsize
            && self.expiration == other.expiration
            && self.expired_items_auto_removal_period == other.expired_items_auto_removal_period
            && self.wrap_async_exit_stack == other.wrap_async_exit_stack
            && self.exit_stack_close_delay == other.exit_stack_close_delay
            && self.negative_cache == other.negative_cache
            && self.negative_expiration == other.negative_expiration
            && self.retry_count == other.retry_count
            && self.backoff_in_seconds.to_bits() == other.backoff_in_seconds.to_bits()
    }
}

impl<T> fmt::Debug for CacheParameters<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheParameters")
            .field("enabled", &self.enabled)
            .field("key", &self.key)
            .field("maxsize", &self.maxsize)
            .field("expiration", &self.expiration)
            .field("expired_items_auto_removal_period", &self.expired_items_auto_removal_period)
            .field("wrap_async_exit_stack", &self.wrap_async_exit_stack)
            .field("exit_stack_close_delay", &self.exit_stack_close_delay)
            .field("negative_cache", &self.negative_cache)
            .field("negative_expiration", &self.negative_expiration)
            .field("retry_count", &self.retry_count)
            .field("backoff_in_seconds", &self.backoff_in_seconds)
            .finish()
    }
}

/// Builder for [`CacheParameters`] with fluent API
#[must_use]
pub struct CacheParametersBuilder<T> {
    params: CacheParameters<T>,
    problems: Vec<String>,
}

impl<T> Default for CacheParametersBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CacheParametersBuilder<T> {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self { params: CacheParameters::default(), problems: Vec::new() }
    }

    /// Turn caching on or off for the lifetime of the façade
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.params.enabled = enabled;
        self
    }

    /// Set the key strategy
    pub fn key(mut self, key: KeyStrategy) -> Self {
        self.params.key = key;
        self
    }

    /// Share one entry across every call
    pub fn single_key(self) -> Self {
        self.key(KeyStrategy::Single)
    }

    /// Bound the number of entries
    pub const fn maxsize(mut self, maxsize: usize) -> Self {
        self.params.maxsize = Some(maxsize);
        self
    }

    /// Remove any size bound
    pub const fn unbounded(mut self) -> Self {
        self.params.maxsize = None;
        self
    }

    /// Set the expiration for successful results
    pub fn expiration(mut self, expiration: impl Into<Expiration<T>>) -> Self {
        self.params.expiration = expiration.into();
        self
    }

    /// Cache failures as well as values
    pub const fn negative_cache(mut self, enabled: bool) -> Self {
        self.params.negative_cache = enabled;
        self
    }

    /// Set the expiration for cached failures
    pub fn negative_expiration(mut self, expiration: impl Into<Expiration<T>>) -> Self {
        self.params.negative_expiration = expiration.into();
        self
    }

    /// Set the number of retries after the first failure
    pub const fn retry_count(mut self, retries: u32) -> Self {
        self.params.retry_count = retries;
        self
    }

    /// Set the delay before the first retry, in seconds
    pub const fn backoff_in_seconds(mut self, seconds: f64) -> Self {
        self.params.backoff_in_seconds = seconds;
        self
    }

    /// Sweep expired entries on calls at most once per `period`
    pub fn expired_items_auto_removal_period(mut self, period: impl Into<DurationSpec>) -> Self {
        match period.into().resolve() {
            Ok(period) => self.params.expired_items_auto_removal_period = Some(period),
            Err(message) => {
                self.problems.push(format!("expired_items_auto_removal_period: {message}"));
            }
        }
        self
    }

    /// Choose which parts of results are managed as resources
    pub fn wrap_async_exit_stack(mut self, mode: ExitStackMode) -> Self {
        self.params.wrap_async_exit_stack = mode;
        self
    }

    /// Manage the resources at the given paths (`$.a.b`, optionally
    /// suffixed with `:ignore_missing`)
    pub fn exit_stack_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for raw in paths {
            match ResourcePath::parse(raw.as_ref()) {
                Ok(path) => parsed.push(path),
                Err(error) => self.problems.push(format!("wrap_async_exit_stack: {error}")),
            }
        }
        self.params.wrap_async_exit_stack = ExitStackMode::Paths(parsed);
        self
    }

    /// Delay releasing replaced or evicted exit stacks
    pub fn exit_stack_close_delay(mut self, delay: impl Into<DurationSpec>) -> Self {
        match delay.into().resolve() {
            Ok(delay) => self.params.exit_stack_close_delay = Some(delay),
            Err(message) => self.problems.push(format!("exit_stack_close_delay: {message}")),
        }
        self
    }

    /// Validate and produce the parameters
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Configuration`] listing every problem found,
    /// including values rejected by earlier setters.
    pub fn build(self) -> MemoResult<CacheParameters<T>> {
        let mut problems = self.problems;
        if let Err(MemoError::Configuration { messages }) = self.params.validate() {
            problems.extend(messages);
        }
        MemoError::merge_configuration(problems).map_or(Ok(self.params), Err)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::params.

    use super::*;

    /// Validates the default parameter values.
    ///
    /// Assertions:
    /// - Confirms caching is enabled, unbounded and never expiring.
    /// - Confirms failures expire after ten seconds when negatively cached.
    /// - Confirms no retries are configured.
    #[test]
    fn test_defaults() {
        let params = CacheParameters::<u32>::builder().build().unwrap();
        assert!(params.enabled);
        assert_eq!(params.maxsize, None);
        assert_eq!(params.expiration, Expiration::Never);
        assert_eq!(params.negative_expiration, Expiration::Every(Duration::from_secs(10)));
        assert!(!params.negative_cache);
        assert_eq!(params.retry_count, 0);
        assert_eq!(params.key, KeyStrategy::Hashed);
        assert!(!params.bypasses_cache());
    }

    /// Validates builder setters and duration inputs.
    ///
    /// Assertions:
    /// - Confirms strings, seconds and durations are accepted for durations.
    /// - Confirms exit stack paths are parsed with their suffix.
    #[test]
    fn test_builder_setters() {
        let params = CacheParameters::<u32>::builder()
            .maxsize(3)
            .expired_items_auto_removal_period("5 minutes")
            .exit_stack_close_delay(1.5)
            .exit_stack_paths(["$.client", "$.pool:ignore_missing"])
            .retry_count(2)
            .backoff_in_seconds(0.25)
            .build()
            .unwrap();

        assert_eq!(params.expired_items_auto_removal_period, Some(Duration::from_secs(300)));
        assert_eq!(params.exit_stack_close_delay, Some(Duration::from_millis(1500)));
        match &params.wrap_async_exit_stack {
            ExitStackMode::Paths(paths) => {
                assert_eq!(paths.len(), 2);
                assert!(paths[1].ignore_missing());
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    /// Validates that `build` reports every invalid option at once.
    ///
    /// Assertions:
    /// - Confirms four independent problems produce four messages.
    #[test]
    fn test_build_collects_all_problems() {
        let result = CacheParameters::<u32>::builder()
            .backoff_in_seconds(-1.0)
            .expiration(f64::NAN)
            .exit_stack_paths(["$..bad"])
            .exit_stack_close_delay("eventually")
            .build();

        match result {
            Err(MemoError::Configuration { messages }) => assert_eq!(messages.len(), 4, "{messages:?}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    /// Validates that misspelled expiration text is rejected by `build`.
    ///
    /// Assertions:
    /// - Confirms an unknown duration unit in `expiration` is reported.
    /// - Confirms the same check applies to `negative_expiration`.
    #[test]
    fn test_build_rejects_unparseable_expirations() {
        let result = CacheParameters::<u32>::builder()
            .expiration("10 minuts")
            .negative_cache(true)
            .negative_expiration("tomorrowish")
            .build();

        match result {
            Err(MemoError::Configuration { messages }) => {
                assert_eq!(messages.len(), 2, "{messages:?}");
                assert!(messages[0].starts_with("expiration:"), "{messages:?}");
                assert!(messages[0].contains("minuts"), "{messages:?}");
                assert!(messages[1].starts_with("negative_expiration:"), "{messages:?}");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    /// Validates the static disable switches.
    ///
    /// Assertions:
    /// - Confirms `enabled(false)` and `maxsize(0)` bypass the store.
    #[test]
    fn test_bypass_switches() {
        assert!(CacheParameters::<u32>::builder().enabled(false).build().unwrap().bypasses_cache());
        assert!(CacheParameters::<u32>::builder().maxsize(0).build().unwrap().bypasses_cache());
    }

    /// Validates equality of cloned parameters.
    ///
    /// Assertions:
    /// - Confirms a clone with a callback expiration compares equal.
    #[test]
    fn test_clone_round_trip() {
        let params = CacheParameters::<u32>::builder()
            .expiration(Expiration::<u32>::callback(|_| Expiration::Never))
            .build()
            .unwrap();
        assert_eq!(params.clone(), params);
    }
}
