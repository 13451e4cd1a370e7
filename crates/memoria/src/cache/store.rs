//! Recency-ordered entry store
//!
//! Wraps the `lru` crate behind a mutex. Entries are handed out as `Arc`s so
//! expiration can be evaluated without holding the lock; the lock is never
//! held across an await point or a user callback.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::exit_stack::ExitStack;
use super::expiration::{CachedItem, Expiration};
use super::key::CacheKey;

/// One memoized result together with its expiration rule and resources
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub item: CachedItem<T>,
    pub expiration: Expiration<T>,
    pub exit_stack: Option<Arc<ExitStack>>,
}

impl<T> CacheEntry<T> {
    pub const fn new(
        item: CachedItem<T>,
        expiration: Expiration<T>,
        exit_stack: Option<Arc<ExitStack>>,
    ) -> Self {
        Self { item, expiration, exit_stack }
    }

    /// Resources owned by this entry
    pub const fn exit_stack(&self) -> Option<&Arc<ExitStack>> {
        self.exit_stack.as_ref()
    }
}

pub type SharedEntry<T> = Arc<CacheEntry<T>>;

/// Keyed entries, most recently used first
pub struct EntryStore<T> {
    entries: Mutex<LruCache<CacheKey, SharedEntry<T>>>,
}

impl<T> EntryStore<T> {
    /// Bounded when `maxsize` is a positive number, unbounded otherwise
    pub fn new(maxsize: Option<usize>) -> Self {
        let entries =
            maxsize.and_then(NonZeroUsize::new).map_or_else(LruCache::unbounded, LruCache::new);
        Self { entries: Mutex::new(entries) }
    }

    /// Look up and promote to most recently used
    pub fn get(&self, key: &CacheKey) -> Option<SharedEntry<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Look up without touching recency
    pub fn peek(&self, key: &CacheKey) -> Option<SharedEntry<T>> {
        self.entries.lock().peek(key).cloned()
    }

    /// Insert as most recently used
    ///
    /// Returns the entries that left the store: the previous entry for `key`
    /// and, when the bound is exceeded, the least recently used entry.
    pub fn put(&self, key: CacheKey, entry: SharedEntry<T>) -> Vec<SharedEntry<T>> {
        let mut entries = self.entries.lock();
        let previous = entries.pop(&key);
        let evicted = entries.push(key, entry).map(|(_, evicted)| evicted);
        drop(entries);
        previous.into_iter().chain(evicted).collect()
    }

    /// Remove the entry for `key` only if it is still `expected`
    ///
    /// Guards sweeps against removing an entry that was recomputed after
    /// the sweep took its snapshot.
    pub fn remove_if_same(&self, key: &CacheKey, expected: &SharedEntry<T>) -> bool {
        let mut entries = self.entries.lock();
        let same = entries.peek(key).is_some_and(|current| Arc::ptr_eq(current, expected));
        if same {
            entries.pop(key);
        }
        drop(entries);
        same
    }

    /// Every entry, most recently used first
    pub fn snapshot(&self) -> Vec<(CacheKey, SharedEntry<T>)> {
        self.entries.lock().iter().map(|(key, entry)| (key.clone(), Arc::clone(entry))).collect()
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<SharedEntry<T>> {
        let mut entries = self.entries.lock();
        let drained = std::iter::from_fn(|| entries.pop_lru().map(|(_, entry)| entry)).collect();
        drop(entries);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
