//! Per-key async mutual exclusion.
//!
//! A map of reference-counted lock handles. A key's handle is created on the
//! first `lock` and removed when the last guard goes away with no waiters
//! left, so the map only holds keys that are in use.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>;

/// Async locks keyed by `K`.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    map: LockMap<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            map: Arc::new(StdMutex::new(HashMap::new())),
        }
    }
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let handle = {
            let mut map = lock_map(&self.map);
            Arc::clone(map.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let mut waiting = Waiting {
            map: &self.map,
            key: &key,
            acquired: false,
        };
        // The future owns the only clone of the handle, so it is gone by the
        // time `waiting` drops if the caller gives up
        let guard = handle.lock_owned().await;
        waiting.acquired = true;
        drop(waiting);
        KeyGuard {
            key,
            map: Arc::clone(&self.map),
            guard: Some(guard),
        }
    }

    /// Take `key` only if nobody holds or awaits it.
    pub fn try_lock(&self, key: K) -> Option<KeyGuard<K>> {
        let handle = {
            let mut map = lock_map(&self.map);
            Arc::clone(map.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        match handle.try_lock_owned() {
            Ok(guard) => Some(KeyGuard {
                key,
                map: Arc::clone(&self.map),
                guard: Some(guard),
            }),
            Err(_) => {
                remove_if_unused(&self.map, &key);
                None
            }
        }
    }

    /// Whether a guard for `key` is currently held.
    pub fn is_locked(&self, key: &K) -> bool {
        lock_map(&self.map)
            .get(key)
            .map(|handle| handle.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        lock_map(&self.map).len()
    }
}

fn lock_map<K>(map: &LockMap<K>) -> StdMutexGuard<'_, HashMap<K, Arc<Mutex<()>>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the map entry of a waiter that was dropped before acquiring.
struct Waiting<'a, K>
where
    K: Eq + Hash,
{
    map: &'a LockMap<K>,
    key: &'a K,
    acquired: bool,
}

impl<K> Drop for Waiting<'_, K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if !self.acquired {
            remove_if_unused(self.map, self.key);
        }
    }
}

fn remove_if_unused<K>(map: &LockMap<K>, key: &K)
where
    K: Eq + Hash,
{
    let mut map = lock_map(map);
    // Only the map's own handle left: nobody holds or waits for the key
    if map
        .get(key)
        .map(|handle| Arc::strong_count(handle) == 1)
        .unwrap_or(false)
    {
        map.remove(key);
    }
}

/// Exclusive access to one key, released on drop.
#[derive(Debug)]
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    map: LockMap<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.guard.take();
        remove_if_unused(&self.map, &self.key);
    }
}
