//! Read-through entity cache and keyed single-flight locks.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;

/// When a lookup goes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Fetch only absent keys and serve whatever is cached. Fits append-only
    /// data, where a cached value is incomplete but never wrong.
    ServeStale,
    /// Fetch on every lookup and refresh the cached value.
    #[default]
    ForceFetch,
}

/// Cache in front of a slower store. Absent keys are always fetched; the
/// policy decides whether cached ones are.
///
/// The internal lock is never held across a fetch, so two concurrent misses
/// on one key both fetch and the later insert wins.
#[derive(Debug)]
pub struct ReadThroughCache<K, V> {
    policy: MissPolicy,
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: MissPolicy) -> Self {
        Self { policy, entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached value for `key`, calling `fetch` on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error; nothing is cached in that case.
    pub async fn get_or_fetch<F, Fut>(&self, key: &K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if self.policy == MissPolicy::ServeStale {
            if let Some(value) = self.entries.lock().await.get(key) {
                return Ok(value.clone());
            }
        }
        let value = fetch().await?;
        self.insert(key.clone(), value.clone()).await;
        Ok(value)
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.insert(key, value);
    }

    /// Applies `f` to a cached value. No-op when `key` is not cached, so the
    /// next lookup reads the store instead of a partial value.
    pub async fn update<F>(&self, key: &K, f: F)
    where
        F: FnOnce(&mut V),
    {
        if let Some(value) = self.entries.lock().await.get_mut(key) {
            f(value);
        }
    }
}

/// One async mutex per key. Used to run at most one recovery per
/// `(file_id, commit_hash)` at a time.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Waits for and returns the guard of `key`'s lock.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the map are idle.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
