//! Per-key write locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type LockKey = (String, String);

/// Serializes writes per `(collection, id)` while letting different keys
/// proceed in parallel.
///
/// Locks are not reentrant: calling [`KeyLocks::with_lock`] for a key from
/// inside a closure already holding that key deadlocks.
#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `(collection, id)`.
    pub fn with_lock<R>(&self, collection: &str, id: &str, f: impl FnOnce() -> R) -> R {
        let key = (collection.to_string(), id.to_string());
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock();
            f()
        };

        let mut slots = self.slots.lock();
        // Table entry plus ours; nobody else is waiting.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&key);
        }
        result
    }

    /// Returns the number of keys currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}
