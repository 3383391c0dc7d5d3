/// Per-key critical sections
///
/// Read-modify-write sequences on one key are serialized while distinct keys
/// proceed concurrently. Idle entries are pruned once the map grows, so the
/// table does not accumulate one mutex per key ever seen.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Number of tracked keys above which idle entries are swept
const PRUNE_THRESHOLD: usize = 256;

/// Guard held for the duration of a keyed critical section
pub type KeyGuard = OwnedMutexGuard<()>;

/// Map of key → async mutex, created on demand
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds an idle entry's Arc
                locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            }
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
