//! Memoizing cache façades and the engine behind them
//!
//! # Features
//!
//! - **Single flight**: concurrent callers of one cold key share one
//!   computation, on threads and on tokio tasks
//! - **Flexible expiration**: durations, instants, strings such as
//!   `"10 minutes"` or `"2030-01-01T00:00:00Z"`, pointers into the cached
//!   value (`"$.token.expiration"`) and callbacks
//! - **Retry and negative caching**: exponential backoff before giving up,
//!   optionally remembering the failure for a while
//! - **Exit stacks**: resources owned by async results are entered once and
//!   released when the result leaves the cache
//! - **Testable**: every façade accepts a [`Clock`](crate::time::Clock)
//!
//! # Examples
//!
//! ## Blocking Façade
//! ```
//! use memoria::{CacheParameters, Memoized};
//!
//! let lengths = Memoized::new(CacheParameters::default(), |s: &String| {
//!     Ok::<_, std::io::Error>(s.len())
//! })?;
//! assert_eq!(lengths.call(&"hello".to_string())?, 5);
//! # Ok::<(), memoria::MemoError>(())
//! ```
//!
//! ## Async Façade with Pointer Expiration
//! ```
//! use memoria::{AsyncMemoized, CacheParameters};
//! use serde_json::{json, Value};
//!
//! # tokio_test::block_on(async {
//! let params = CacheParameters::builder().expiration("$.expires_in").build()?;
//! let tokens = AsyncMemoized::new(params, |user: String| async move {
//!     Ok::<_, std::io::Error>(json!({"user": user, "expires_in": "30 minutes"}))
//! })?;
//!
//! let token: Value = tokens.call("alice".to_string()).await?;
//! assert_eq!(token["user"], "alice");
//! # Ok::<(), memoria::MemoError>(())
//! # }).unwrap();
//! ```

mod async_memoized;
mod coordinator;
pub mod exit_stack;
pub mod expiration;
mod key;
mod memoized;
pub mod params;
pub mod path;
pub mod registry;
mod stats;
mod store;
pub mod tree;

pub use async_memoized::AsyncMemoized;
pub use exit_stack::{ExitStack, ExitStackMode, ManagedResource, ReleaseTracker};
pub use expiration::{
    AsyncExpirationCallback, CachedItem, Expiration, ExpirationCallback, ExpiryDecision, Outcome,
    MAX_RESOLUTION_DEPTH,
};
pub use key::{CacheKey, KeyStrategy};
pub use memoized::Memoized;
pub use params::{CacheParameters, CacheParametersBuilder, DurationSpec, DEFAULT_NEGATIVE_EXPIRATION};
pub use path::{PathSegment, ResourcePath, ValuePath};
pub use stats::CacheInfo;
pub use tree::{lookup_serialized, navigate, ValueTree};
