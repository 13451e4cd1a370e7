//! Exit stacks: ownership records for resources held by cached values
//!
//! When a cached value owns external handles (clients, connections), the
//! cache enters each handle once after computing the value and exits them
//! in reverse order when the value leaves the cache. Replaced and evicted
//! values are released on tracked background tasks; explicit clears release
//! inline.
//!
//! # Release Tracking
//!
//! Every background release is tracked twice: by the [`ReleaseTracker`] of
//! the owning cache and by the process-wide tracker behind
//! [`crate::await_exit_stack_close_operations`]. Cancelling a tracker swaps
//! in a fresh token, so releases scheduled afterwards are unaffected.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::path::ResourcePath;
use super::tree::ValueTree;
use crate::error::{BoxError, MemoError, MemoResult};

/// A resource with explicit acquire and release hooks
#[async_trait]
pub trait ManagedResource: Send + Sync {
    /// Acquire the resource. Called once, right after the value is computed.
    ///
    /// # Errors
    ///
    /// A failure aborts caching of the value and releases resources
    /// entered before this one.
    async fn enter(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release the resource. Called at most once per exit stack.
    ///
    /// # Errors
    ///
    /// Failures are logged and reported; later resources are still released.
    async fn exit(&self) -> Result<(), BoxError>;

    /// Name used in logs and errors
    #[must_use]
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Which parts of a computed value an async cache should manage
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExitStackMode {
    /// Values are cached as-is
    #[default]
    Disabled,
    /// The value itself is a managed resource
    WholeValue,
    /// Each path addresses a managed resource inside the value
    Paths(Vec<ResourcePath>),
}

impl ExitStackMode {
    /// Whether any resource management is configured
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Resources entered for one cached value, in acquisition order
pub struct ExitStack {
    resources: Mutex<Vec<Arc<dyn ManagedResource>>>,
    released: AtomicBool,
}

impl ExitStack {
    /// Create an empty stack
    #[must_use]
    pub const fn new() -> Self {
        Self { resources: Mutex::new(Vec::new()), released: AtomicBool::new(false) }
    }

    /// Enter `resource` and record it for release
    ///
    /// A resource whose `enter` fails is not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::ResourceAcquisition`] when `enter` fails.
    pub async fn enter(&self, resource: Arc<dyn ManagedResource>) -> MemoResult<()> {
        resource.enter().await.map_err(|source| MemoError::acquisition(resource.name(), source))?;
        self.resources.lock().push(resource);
        Ok(())
    }

    /// Number of resources currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    /// Whether the stack holds no resources
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `release` has already run
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Exit every resource in reverse acquisition order
    ///
    /// Every resource is exited even if an earlier exit fails. The first
    /// failure is returned together with the failure count. A second call is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::ResourceRelease`] when any exit fails.
    pub async fn release(&self) -> MemoResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let resources = std::mem::take(&mut *self.resources.lock());
        let mut failures = 0usize;
        let mut first_error: Option<BoxError> = None;

        for resource in resources.iter().rev() {
            if let Err(error) = resource.exit().await {
                warn!(resource = %resource.name(), error = %error, "Failed to release resource");
                failures += 1;
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), |error| Err(MemoError::release(failures, error)))
    }

    /// Enter the resources `mode` selects from `value`
    ///
    /// Returns `None` when nothing needs managing. On any failure every
    /// resource entered so far is released before the error is returned.
    ///
    /// # Errors
    ///
    /// Fails when a required path has no resource or a resource cannot be
    /// entered.
    pub async fn wrap<T: ValueTree + Sync + ?Sized>(
        value: &T,
        mode: &ExitStackMode,
    ) -> MemoResult<Option<Self>> {
        let paths = match mode {
            ExitStackMode::Disabled => return Ok(None),
            ExitStackMode::WholeValue => vec![ResourcePath::default()],
            ExitStackMode::Paths(paths) => paths.clone(),
        };

        let stack = Self::new();
        for path in &paths {
            let Some(resource) = value.resource(path.path().segments()) else {
                if path.ignore_missing() {
                    debug!(path = %path, "Skipping missing resource path");
                    continue;
                }
                stack.unwind().await;
                return Err(MemoError::path(path.path().to_string(), "no managed resource at path"));
            };

            if let Err(error) = stack.enter(resource).await {
                stack.unwind().await;
                return Err(error);
            }
        }

        Ok(Some(stack))
    }

    async fn unwind(&self) {
        if let Err(error) = self.release().await {
            warn!(error = %error, "Failed to unwind partially built exit stack");
        }
    }
}

impl Default for ExitStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExitStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitStack")
            .field("resources", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Tracks background releases so they can be awaited or cancelled
#[derive(Debug, Clone, Default)]
pub struct ReleaseTracker {
    tasks: Arc<Mutex<TaskTracker>>,
    draining: Arc<Mutex<Vec<TaskTracker>>>,
    cancel: Arc<Mutex<CancellationToken>>,
}

static GLOBAL_RELEASES: Lazy<ReleaseTracker> = Lazy::new(ReleaseTracker::new);

/// The process-wide tracker every scheduled release is registered with
pub(crate) fn global_releases() -> &'static ReleaseTracker {
    &GLOBAL_RELEASES
}

impl ReleaseTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled releases that have not finished
    #[must_use]
    pub fn pending(&self) -> usize {
        let draining: usize = self.draining.lock().iter().map(TaskTracker::len).sum();
        self.tasks.lock().len() + draining
    }

    /// Release `stack` on a background task after an optional delay
    ///
    /// Without a tokio runtime the stack cannot be released asynchronously;
    /// this is logged and the resources are dropped unreleased.
    pub fn schedule(&self, stack: Arc<ExitStack>, delay: Option<Duration>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(resources = stack.len(), "No runtime available to release exit stack");
            return;
        };

        let global = global_releases();
        let local_cancel = self.cancel.lock().clone();
        let global_cancel = global.cancel.lock().clone();

        let release = async move {
            tokio::select! {
                () = local_cancel.cancelled() => debug!("Exit stack release cancelled"),
                () = global_cancel.cancelled() => debug!("Exit stack release cancelled globally"),
                () = async {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if let Err(error) = stack.release().await {
                        warn!(error = %error, "Background exit stack release failed");
                    }
                } => {}
            }
        };

        let tracked = global.tasks.lock().track_future(release);
        let tracked = self.tasks.lock().track_future(tracked);
        handle.spawn(tracked);
    }

    /// Wait for every release scheduled before this call
    ///
    /// Releases scheduled while waiting go to a fresh generation and are not
    /// waited for. Generations a timed out wait gave up on are waited for
    /// again by the next call.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::ReleaseTimeout`] when `timeout` elapses first.
    pub async fn wait(&self, timeout: Option<Duration>) -> MemoResult<()> {
        let generations = {
            let current = std::mem::take(&mut *self.tasks.lock());
            current.close();
            let mut draining = self.draining.lock();
            draining.retain(|generation| !generation.is_empty());
            draining.push(current);
            draining.clone()
        };
        let all_done = join_all(generations.iter().map(TaskTracker::wait));

        let Some(limit) = timeout else {
            all_done.await;
            return Ok(());
        };
        tokio::time::timeout(limit, all_done)
            .await
            .map(|_| ())
            .map_err(|_| MemoError::ReleaseTimeout { timeout: limit })
    }

    /// Cancel every release scheduled before this call
    pub fn cancel(&self) {
        let previous = std::mem::take(&mut *self.cancel.lock());
        previous.cancel();
    }
}
