//! Per-key async locks.
//!
//! DESIGN
//! ======
//! One `tokio::sync::Mutex<()>` per key, created on first use and dropped
//! from the registry when the last guard releases with no other task holding
//! a handle, so the map only tracks keys that are locked or contended.
//! Multi-key acquisition always sorts and dedups
//! the keys first, so two callers locking overlapping sets can never wait
//! on each other in opposite orders. The registry map itself sits behind a
//! std mutex that is only held to clone a handle, never across an await.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Default)]
pub struct KeyLocks {
    handles: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Holds every lock acquired by one `lock_many` call until dropped.
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct KeyGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
    registry: KeyLocks,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guards.clear();
        self.registry.prune(&self.keys);
    }
}

impl KeyLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.entry(key.to_owned()).or_default().clone()
    }

    /// Forget handles nobody else holds. Cloning a handle happens under the
    /// same map lock, so a waiter always keeps its entry alive.
    fn prune(&self, keys: &[String]) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if handles.get(key).is_some_and(|h| Arc::strong_count(h) == 1) {
                handles.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Lock a single key.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.lock_many([key]).await
    }

    /// Lock every key in `keys`, in lexical order.
    pub async fn lock_many<I, S>(&self, keys: I) -> KeyGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ordered: BTreeSet<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_owned())
            .collect();
        let mut guard = KeyGuard { guards: Vec::with_capacity(ordered.len()), keys: Vec::new(), registry: self.clone() };
        for key in ordered {
            let handle = self.handle(&key);
            guard.keys.push(key);
            guard.guards.push(handle.lock_owned().await);
        }
        guard
    }
}
