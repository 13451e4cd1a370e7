//! Memoizing cache engine for synchronous and asynchronous call sites.
//!
//! A [`Memoized`] (blocking) or [`AsyncMemoized`] (tokio) façade wraps a
//! computation and remembers its results per argument key. Every façade
//! shares the same engine:
//!
//! - a recency-ordered entry store with an optional size bound
//! - per-key single-flight coordination so concurrent callers of a cold key
//!   trigger exactly one computation
//! - a closed [`Expiration`] type covering static durations, absolute
//!   instants, human-readable strings, pointers into the cached value and
//!   user callbacks
//! - retry with exponential backoff and optional negative caching
//! - exit stacks that tie the lifetime of acquired resources (clients,
//!   connections) to the cached value that owns them
//!
//! # Example
//!
//! ```
//! use memoria::{CacheParameters, Memoized};
//!
//! let params = CacheParameters::builder().maxsize(128).expiration("10 minutes").build()?;
//! let square = Memoized::new(params, |n: &u64| Ok::<_, std::io::Error>(n * n))?;
//!
//! assert_eq!(square.call(&12)?, 144);
//! assert_eq!(square.call(&12)?, 144);
//! assert_eq!(square.cache_info().hits, 1);
//! # Ok::<(), memoria::MemoError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod error;
pub mod resilience;
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use cache::registry::{
    await_exit_stack_close_operations, cancel_exit_stack_close_operations, clear_all,
    clear_all_sync,
};
pub use cache::{
    AsyncMemoized, CacheInfo, CacheKey, CacheParameters, CacheParametersBuilder, CachedItem,
    DurationSpec, ExitStack, ExitStackMode, Expiration, ExpiryDecision, KeyStrategy,
    ManagedResource, Memoized, Outcome, ResourcePath, ValuePath, ValueTree,
};
pub use error::{BoxError, ErrorClassification, ErrorSeverity, MemoError, MemoResult, SharedError};
pub use time::{Clock, MockClock, SystemClock};
