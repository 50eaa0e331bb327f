//! Per-receipt render serialization
//!
//! Concurrent misses for the same receipt queue behind one async mutex so
//! the derivative is rendered once; later callers find it in the cache.
//! Entries are held weakly and pruned as they go idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct RenderLocks {
    inner: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl RenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, receipt: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(receipt).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    map.insert(receipt.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Receipts with a live lock.
    pub fn active(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.values().filter(|w| w.strong_count() > 0).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|w| w.strong_count() > 0)
                .count(),
        }
    }
}
