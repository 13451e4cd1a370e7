//! Expiration policies and their evaluation
//!
//! [`Expiration`] is a closed set of shapes. Raw inputs (numbers, strings),
//! pointers into the cached value and callbacks all resolve to another
//! `Expiration`, so evaluation is one loop that keeps stepping until it
//! reaches a decision. The loop is capped at [`MAX_RESOLUTION_DEPTH`] steps;
//! a pointer that points at itself, or a callback that keeps returning
//! callbacks, fails with [`MemoError::CircularPointer`] instead of spinning.
//!
//! Expiry instants are inclusive: an entry whose deadline equals the
//! current time is expired.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::path::ResourcePath;
use super::tree::ValueTree;
use crate::error::{MemoError, MemoResult};
use crate::time::{resolve_number, resolve_text, ResolvedSpec};

/// Maximum number of resolution steps before giving up
pub const MAX_RESOLUTION_DEPTH: usize = 16;

const POINTER_PREFIX: &str = "$.";

/// Synchronous expiration callback
pub type ExpirationCallback<T> = Arc<dyn Fn(&CachedItem<T>) -> Expiration<T> + Send + Sync>;

/// Asynchronous expiration callback
pub type AsyncExpirationCallback<T> =
    Arc<dyn Fn(CachedItem<T>) -> BoxFuture<'static, Expiration<T>> + Send + Sync>;

/// Result of a computation as stored in the cache
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The computation succeeded
    Value(T),
    /// The computation failed and negative caching kept the failure
    Error(MemoError),
}

impl<T: Clone> Outcome<T> {
    /// Hand the stored outcome to a caller
    ///
    /// # Errors
    ///
    /// Returns a clone of the cached failure.
    pub fn to_result(&self) -> MemoResult<T> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Error(error) => Err(error.clone()),
        }
    }
}

/// The view of a cache entry passed to expiration callbacks
#[derive(Debug, Clone)]
pub struct CachedItem<T> {
    /// Stored value or failure
    pub outcome: Outcome<T>,
    /// When the outcome was computed
    pub last_fetched: DateTime<Utc>,
}

impl<T> CachedItem<T> {
    /// Create an item for a successful computation
    #[must_use]
    pub const fn value(value: T, last_fetched: DateTime<Utc>) -> Self {
        Self { outcome: Outcome::Value(value), last_fetched }
    }

    /// Create an item for a cached failure
    #[must_use]
    pub const fn error(error: MemoError, last_fetched: DateTime<Utc>) -> Self {
        Self { outcome: Outcome::Error(error), last_fetched }
    }

    /// The stored value, if the computation succeeded
    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Value(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    /// Whether this item records a failure
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Verdict for one entry at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDecision {
    /// Valid with no known deadline
    Valid,
    /// Must be recomputed
    Expired,
    /// Valid until the given instant (exclusive)
    RefreshAt(DateTime<Utc>),
}

impl ExpiryDecision {
    /// Whether the entry must be recomputed
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// When a cached entry stops being valid
pub enum Expiration<T> {
    /// Never expires
    Never,
    /// `true` means expired, `false` means never expires
    Bool(bool),
    /// Expires at a fixed instant
    At(DateTime<Utc>),
    /// Expires a fixed interval after the entry was computed
    Every(Duration),
    /// A timestamp (above 1e8) or a refresh interval in seconds
    Number(f64),
    /// A pointer (`$.path`), datetime, date, time of day or duration
    Text(String),
    /// A scalar inside the cached value, read again on every check
    Pointer(ResourcePath),
    /// Computed from the entry on every check
    Callback(ExpirationCallback<T>),
    /// Computed asynchronously from the entry on every check
    AsyncCallback(AsyncExpirationCallback<T>),
}

enum Step<T> {
    Decided(ExpiryDecision),
    Next(Expiration<T>),
    Await(AsyncExpirationCallback<T>),
}

impl<T> Expiration<T> {
    /// Build a pointer expiration from `$.path[:ignore_missing]`
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::PointerResolution`] if `path` is not a valid
    /// pointer.
    pub fn pointer(path: &str) -> MemoResult<Self> {
        ResourcePath::parse(path).map(Self::Pointer).map_err(|error| match error {
            MemoError::PathResolution { path, message } => {
                MemoError::PointerResolution { path, message }
            }
            other => other,
        })
    }

    /// Build a synchronous callback expiration
    #[must_use]
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&CachedItem<T>) -> Self + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    /// Build an asynchronous callback expiration
    #[must_use]
    pub fn async_callback<F, Fut>(callback: F) -> Self
    where
        F: Fn(CachedItem<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Self> + Send + 'static,
    {
        Self::AsyncCallback(Arc::new(move |item| callback(item).boxed()))
    }

    /// Whether evaluating this expiration needs an async context
    ///
    /// Only the top-level shape is inspected; a callback or pointer that
    /// later resolves to an async callback is caught during evaluation.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        matches!(self, Self::AsyncCallback(_))
    }

    /// Static validation of raw inputs
    ///
    /// Raw numbers and non-pointer text are resolved once against the
    /// current time so that unparseable input is rejected before anything
    /// is cached.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Self::Number(value) if !value.is_finite() || *value < 0.0 => {
                Err(format!("expiration {value} must be a finite, non-negative number"))
            }
            Self::Number(value) => resolve_number(*value).map(|_| ()).map_err(|e| e.to_string()),
            Self::Text(text) if text.trim().is_empty() => {
                Err("expiration text must not be empty".to_string())
            }
            Self::Text(text) if text.trim().starts_with(POINTER_PREFIX) => {
                ResourcePath::parse(text.trim()).map(|_| ()).map_err(|e| e.to_string())
            }
            Self::Text(text) => resolve_text(text, Utc::now()).map(|_| ()).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

impl<T: ValueTree + Clone> Expiration<T> {
    /// Evaluate without awaiting
    ///
    /// Reaching an [`Expiration::AsyncCallback`] fails with
    /// [`MemoError::Configuration`].
    ///
    /// # Errors
    ///
    /// Fails on malformed text, pointers that do not resolve, pointer chains
    /// deeper than [`MAX_RESOLUTION_DEPTH`] and async callbacks.
    pub fn evaluate_blocking(
        &self,
        item: &CachedItem<T>,
        now: DateTime<Utc>,
    ) -> MemoResult<ExpiryDecision> {
        let mut current = self.clone();
        for _ in 0..MAX_RESOLUTION_DEPTH {
            match current.step(item, now)? {
                Step::Decided(decision) => return Ok(decision),
                Step::Next(next) => current = next,
                Step::Await(_) => {
                    return Err(MemoError::config(
                        "async expiration callbacks can only be evaluated by async caches",
                    ))
                }
            }
        }
        Err(MemoError::CircularPointer { depth: MAX_RESOLUTION_DEPTH })
    }

    /// Evaluate, awaiting async callbacks as needed
    ///
    /// # Errors
    ///
    /// Fails on malformed text, pointers that do not resolve and pointer
    /// chains deeper than [`MAX_RESOLUTION_DEPTH`].
    pub async fn evaluate(
        &self,
        item: &CachedItem<T>,
        now: DateTime<Utc>,
    ) -> MemoResult<ExpiryDecision>
    where
        T: Send + Sync,
    {
        let mut current = self.clone();
        for _ in 0..MAX_RESOLUTION_DEPTH {
            match current.step(item, now)? {
                Step::Decided(decision) => return Ok(decision),
                Step::Next(next) => current = next,
                Step::Await(callback) => current = callback(item.clone()).await,
            }
        }
        Err(MemoError::CircularPointer { depth: MAX_RESOLUTION_DEPTH })
    }

    fn step(&self, item: &CachedItem<T>, now: DateTime<Utc>) -> MemoResult<Step<T>> {
        let step = match self {
            Self::Never => Step::Decided(ExpiryDecision::Valid),
            Self::Bool(expired) => Step::Decided(decide(ResolvedSpec::from(*expired), item, now)),
            Self::At(at) => Step::Decided(deadline(*at, now)),
            Self::Every(interval) => {
                Step::Decided(decide(ResolvedSpec::EveryInterval(*interval), item, now))
            }
            Self::Number(value) => Step::Decided(decide(resolve_number(*value)?, item, now)),
            Self::Text(text) => {
                let text = text.trim();
                if text.starts_with(POINTER_PREFIX) {
                    Step::Next(Self::pointer(text)?)
                } else {
                    Step::Decided(decide(resolve_text(text, now)?, item, now))
                }
            }
            Self::Pointer(path) => Self::follow(path, item)?,
            Self::Callback(callback) => Step::Next(callback(item)),
            Self::AsyncCallback(callback) => Step::Await(Arc::clone(callback)),
        };
        Ok(step)
    }

    fn follow(path: &ResourcePath, item: &CachedItem<T>) -> MemoResult<Step<T>> {
        let found = item.get().and_then(|value| value.lookup(path.path().segments()));
        let step = match found {
            None if path.ignore_missing() => Step::Decided(ExpiryDecision::Valid),
            None => {
                return Err(MemoError::pointer(path.path().to_string(), "no value at path"));
            }
            Some(Value::Null) => Step::Next(Self::Never),
            Some(Value::Bool(flag)) => Step::Next(Self::Bool(flag)),
            Some(Value::Number(number)) => match number.as_f64() {
                Some(value) => Step::Next(Self::Number(value)),
                None => {
                    return Err(MemoError::pointer(path.path().to_string(), "unusable number"));
                }
            },
            Some(Value::String(text)) => Step::Next(Self::Text(text)),
            Some(Value::Array(_) | Value::Object(_)) => {
                return Err(MemoError::pointer(
                    path.path().to_string(),
                    "expected a scalar expiration, found a collection",
                ));
            }
        };
        Ok(step)
    }
}

fn deadline(at: DateTime<Utc>, now: DateTime<Utc>) -> ExpiryDecision {
    if now >= at {
        ExpiryDecision::Expired
    } else {
        ExpiryDecision::RefreshAt(at)
    }
}

fn decide<T>(spec: ResolvedSpec, item: &CachedItem<T>, now: DateTime<Utc>) -> ExpiryDecision {
    match spec {
        ResolvedSpec::Never => ExpiryDecision::Valid,
        ResolvedSpec::AlreadyExpired => ExpiryDecision::Expired,
        ResolvedSpec::AtInstant(at) => deadline(at, now),
        ResolvedSpec::EveryInterval(interval) => chrono::Duration::from_std(interval)
            .ok()
            .and_then(|interval| item.last_fetched.checked_add_signed(interval))
            .map_or(ExpiryDecision::Valid, |at| deadline(at, now)),
    }
}

impl<T> Clone for Expiration<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Bool(flag) => Self::Bool(*flag),
            Self::At(at) => Self::At(*at),
            Self::Every(interval) => Self::Every(*interval),
            Self::Number(value) => Self::Number(*value),
            Self::Text(text) => Self::Text(text.clone()),
            Self::Pointer(path) => Self::Pointer(path.clone()),
            Self::Callback(callback) => Self::Callback(Arc::clone(callback)),
            Self::AsyncCallback(callback) => Self::AsyncCallback(Arc::clone(callback)),
        }
    }
}

impl<T> fmt::Debug for Expiration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::Bool(flag) => f.debug_tuple("Bool").field(flag).finish(),
            Self::At(at) => f.debug_tuple("At").field(at).finish(),
            Self::Every(interval) => f.debug_tuple("Every").field(interval).finish(),
            Self::Number(value) => f.debug_tuple("Number").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Pointer(path) => f.debug_tuple("Pointer").field(&path.to_string()).finish(),
            Self::Callback(_) => write!(f, "Callback(..)"),
            Self::AsyncCallback(_) => write!(f, "AsyncCallback(..)"),
        }
    }
}

/// Callbacks compare by identity.
impl<T> PartialEq for Expiration<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Never, Self::Never) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::At(a), Self::At(b)) => a == b,
            (Self::Every(a), Self::Every(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => Arc::ptr_eq(a, b),
            (Self::AsyncCallback(a), Self::AsyncCallback(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T> Default for Expiration<T> {
    fn default() -> Self {
        Self::Never
    }
}

impl<T> From<bool> for Expiration<T> {
    fn from(expired: bool) -> Self {
        Self::Bool(expired)
    }
}

impl<T> From<Duration> for Expiration<T> {
    fn from(interval: Duration) -> Self {
        Self::Every(interval)
    }
}

impl<T> From<DateTime<Utc>> for Expiration<T> {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

impl<T> From<&str> for Expiration<T> {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl<T> From<String> for Expiration<T> {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl<T> From<ResourcePath> for Expiration<T> {
    fn from(path: ResourcePath) -> Self {
        Self::Pointer(path)
    }
}

macro_rules! numeric_expiration {
    ($($ty:ty),*) => {
        $(
            impl<T> From<$ty> for Expiration<T> {
                fn from(value: $ty) -> Self {
                    Self::Number(f64::from(value))
                }
            }
        )*
    };
}

numeric_expiration!(i32, u32, f32, f64);

impl<T> From<i64> for Expiration<T> {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl<T> From<u64> for Expiration<T> {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}
