//! Per-fingerprint advisory locks serializing session finalization.
//!
//! Locks are process-local. An entry lives in the map only while some caller
//! holds or waits on it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Keyed async mutexes.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<LockMap>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> SessionGuard {
        let mutex = self.inner.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        SessionGuard {
            key: key.to_string(),
            map: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one key; released on drop.
pub struct SessionGuard {
    key: String,
    map: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release first so our reference no longer counts.
        drop(self.guard.take());
        self.map
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
