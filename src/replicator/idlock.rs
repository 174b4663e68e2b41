//! Id-keyed mutex
//!
//! Serializes work per string key (here: the workflow identity) without
//! holding one mutex per key forever; an entry is evicted as soon as its
//! last holder or waiter is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct IdLockEntry {
    mutex: Arc<AsyncMutex<()>>,
    ref_count: usize,
}

/// Mutex keyed by id with lazy entry eviction
#[derive(Clone, Default)]
pub struct IdMutex {
    entries: Arc<Mutex<HashMap<String, IdLockEntry>>>,
}

/// Holds the lock for one key; released on drop
pub struct IdMutexGuard {
    entries: Arc<Mutex<HashMap<String, IdLockEntry>>>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl IdMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind other holders of the same key
    pub async fn lock(&self, key: &str) -> IdMutexGuard {
        let mutex = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(key.to_string()).or_insert_with(|| IdLockEntry {
                mutex: Arc::new(AsyncMutex::new(())),
                ref_count: 0,
            });
            entry.ref_count += 1;
            entry.mutex.clone()
        };
        let guard = mutex.lock_owned().await;
        IdMutexGuard {
            entries: self.entries.clone(),
            key: key.to_string(),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Drop for IdMutexGuard {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                entries.remove(&self.key);
            }
        }
    }
}
