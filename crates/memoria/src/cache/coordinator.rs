//! Per-key single-flight coordination
//!
//! Concurrent callers of one cold key share a single computation. The first
//! caller becomes the leader and runs it; everyone else joins the leader's
//! flight and receives a clone of its outcome. A flight is removed from the
//! table before its outcome is published, so a caller that arrives after
//! publication goes through the store instead of a finished flight.
//!
//! [`BlockingFlights`] parks followers on a condition variable.
//! [`AsyncFlights`] spawns the leader's work as a tokio task and hands out a
//! shared receiver, so dropping a caller's future never aborts the
//! computation other callers are waiting for.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::trace;

use super::key::CacheKey;
use crate::error::{MemoError, MemoResult};

/// Outcome slot for one blocking computation
pub struct Flight<T> {
    slot: Mutex<Option<MemoResult<T>>>,
    ready: Condvar,
}

impl<T: Clone> Flight<T> {
    const fn new() -> Self {
        Self { slot: Mutex::new(None), ready: Condvar::new() }
    }

    /// Block until the leader publishes, then clone its outcome
    pub fn wait(&self) -> MemoResult<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn publish(&self, outcome: MemoResult<T>) {
        *self.slot.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

/// In-flight blocking computations, by key
pub struct BlockingFlights<T> {
    flights: Mutex<HashMap<CacheKey, Arc<Flight<T>>>>,
}

impl<T> BlockingFlights<T> {
    /// Number of keys currently being computed
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }
}

/// What a caller must do after joining a key
pub enum Role<'a, T: Clone> {
    /// Run the computation and complete the guard
    Leader(FlightGuard<'a, T>),
    /// Wait for the leader
    Follower(Arc<Flight<T>>),
}

impl<T: Clone> BlockingFlights<T> {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()) }
    }

    /// Lead a new flight for `key` or follow the existing one
    pub fn join(&self, key: &CacheKey) -> Role<'_, T> {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            trace!(key = %key, "Joining in-flight computation");
            return Role::Follower(Arc::clone(flight));
        }
        let flight = Arc::new(Flight::new());
        flights.insert(key.clone(), Arc::clone(&flight));
        drop(flights);
        Role::Leader(FlightGuard { owner: self, key: key.clone(), flight, done: false })
    }
}

/// Leadership of one blocking flight
///
/// Dropping the guard without completing it (the computation panicked)
/// releases the followers with [`MemoError::Cancelled`].
pub struct FlightGuard<'a, T: Clone> {
    owner: &'a BlockingFlights<T>,
    key: CacheKey,
    flight: Arc<Flight<T>>,
    done: bool,
}

impl<T: Clone> FlightGuard<'_, T> {
    /// Publish the outcome to every follower
    pub fn complete(mut self, outcome: MemoResult<T>) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: MemoResult<T>) {
        if self.done {
            return;
        }
        self.done = true;
        self.owner.flights.lock().remove(&self.key);
        self.flight.publish(outcome);
    }
}

impl<T: Clone> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.finish(Err(MemoError::Cancelled));
    }
}

/// A computation every interested caller can await
pub type SharedFlight<T> = Shared<BoxFuture<'static, MemoResult<T>>>;

/// In-flight async computations, by key
pub struct AsyncFlights<T> {
    flights: Mutex<HashMap<CacheKey, SharedFlight<T>>>,
}

impl<T> AsyncFlights<T> {
    /// Number of keys currently being computed
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }
}

/// Removes a finished flight from the table, even if its task panicked
struct RemoveOnDrop<T: Clone + Send + Sync + 'static> {
    owner: Arc<AsyncFlights<T>>,
    key: Option<CacheKey>,
}

impl<T: Clone + Send + Sync + 'static> Drop for RemoveOnDrop<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.owner.flights.lock().remove(&key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncFlights<T> {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()) }
    }

    /// Join the flight for `key`, starting `compute` if there is none
    ///
    /// Returns whether this caller started the flight. `compute` is only
    /// invoked by the leader, while no lock is held.
    pub fn join<F>(self: &Arc<Self>, key: &CacheKey, compute: F) -> (bool, SharedFlight<T>)
    where
        F: FnOnce() -> BoxFuture<'static, MemoResult<T>>,
    {
        let running = self.flights.lock().get(key).cloned();
        if let Some(flight) = running {
            trace!(key = %key, "Joining in-flight computation");
            return (false, flight);
        }

        let (sender, receiver) = oneshot::channel();
        let flight: SharedFlight<T> = receiver
            .map(|received| received.unwrap_or(Err(MemoError::Cancelled)))
            .boxed()
            .shared();

        {
            let mut flights = self.flights.lock();
            if let Some(existing) = flights.get(key) {
                return (false, existing.clone());
            }
            flights.insert(key.clone(), flight.clone());
        }

        let cleanup = RemoveOnDrop { owner: Arc::clone(self), key: Some(key.clone()) };
        let computation = compute();
        tokio::spawn(async move {
            let outcome = computation.await;
            drop(cleanup);
            // Every caller may have gone away; the outcome is already stored.
            let _ = sender.send(outcome);
        });

        (true, flight)
    }
}
