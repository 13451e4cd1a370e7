//! Process-wide registry of live caches
//!
//! Every façade registers a weak handle at construction, so the registry
//! never keeps a cache alive. Dead handles are pruned whenever a new cache
//! registers and whenever the registry is walked.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::exit_stack::global_releases;
use crate::error::MemoResult;

/// A blocking cache that can be cleared from anywhere
pub(crate) trait SyncCacheHandle: Send + Sync {
    fn clear(&self);
}

/// An async cache whose clear awaits its resource releases
#[async_trait]
pub(crate) trait AsyncCacheHandle: Send + Sync {
    async fn clear(&self) -> MemoResult<()>;
}

#[derive(Default)]
struct Registry {
    blocking: Vec<Weak<dyn SyncCacheHandle>>,
    asynchronous: Vec<Weak<dyn AsyncCacheHandle>>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

pub(crate) fn register_sync(handle: Weak<dyn SyncCacheHandle>) {
    let mut registry = REGISTRY.lock();
    registry.blocking.retain(|existing| existing.strong_count() > 0);
    registry.blocking.push(handle);
}

pub(crate) fn register_async(handle: Weak<dyn AsyncCacheHandle>) {
    let mut registry = REGISTRY.lock();
    registry.asynchronous.retain(|existing| existing.strong_count() > 0);
    registry.asynchronous.push(handle);
}

fn live_sync() -> Vec<Arc<dyn SyncCacheHandle>> {
    let mut registry = REGISTRY.lock();
    registry.blocking.retain(|handle| handle.strong_count() > 0);
    registry.blocking.iter().filter_map(Weak::upgrade).collect()
}

fn live_async() -> Vec<Arc<dyn AsyncCacheHandle>> {
    let mut registry = REGISTRY.lock();
    registry.asynchronous.retain(|handle| handle.strong_count() > 0);
    registry.asynchronous.iter().filter_map(Weak::upgrade).collect()
}

/// Clear every live blocking cache
///
/// Async caches are left untouched; use [`clear_all`] for those.
pub fn clear_all_sync() {
    let caches = live_sync();
    debug!(caches = caches.len(), "Clearing all synchronous caches");
    for cache in caches {
        cache.clear();
    }
}

/// Clear every live cache, awaiting the resource releases of async ones
///
/// Every cache is cleared even if releasing resources of an earlier one
/// fails; the first release failure is returned.
///
/// # Errors
///
/// Returns the first resource release failure.
pub async fn clear_all() -> MemoResult<()> {
    clear_all_sync();

    let caches = live_async();
    debug!(caches = caches.len(), "Clearing all asynchronous caches");
    let mut first_error = None;
    for cache in caches {
        if let Err(error) = cache.clear().await {
            warn!(error = %error, "Failed to release resources while clearing cache");
            first_error.get_or_insert(error);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Wait for every background exit stack release scheduled so far
///
/// With a timeout, fails with [`crate::MemoError::ReleaseTimeout`] if the
/// releases have not finished in time; they keep running regardless.
///
/// # Errors
///
/// Returns [`crate::MemoError::ReleaseTimeout`] when `timeout` elapses first.
pub async fn await_exit_stack_close_operations(timeout: Option<Duration>) -> MemoResult<()> {
    global_releases().wait(timeout).await
}

/// Cancel every background exit stack release scheduled so far
///
/// Cancelled releases never exit their resources. Releases scheduled after
/// this call are unaffected.
pub fn cancel_exit_stack_close_operations() {
    global_releases().cancel();
}
