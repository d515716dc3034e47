//! Store capability handed to sync and integration components.

use crate::backend::RecordStore;
use crate::error::StoreResult;
use crate::locks::KeyLocks;
use homestead_sync_protocol::Record;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Cloneable access to a [`RecordStore`] plus its per-key write locks.
///
/// Components receive a `StoreHandle` instead of reaching for a global.
/// Every write through the handle holds the `(collection, id)` lock.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyLocks>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Wraps a store with a fresh lock table.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Wraps a store with a shared lock table.
    pub fn with_locks(store: Arc<dyn RecordStore>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the lock table.
    pub fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    /// Returns the record with `id` in `collection`.
    pub fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        self.store.get(collection, id)
    }

    /// Returns every record in `collection`.
    pub fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>> {
        self.store.get_all(collection)
    }

    /// Returns records whose top-level field `index` equals `value`.
    pub fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        self.store.get_all_by_index(collection, index, value)
    }

    /// Runs `f` while holding the lock for `(collection, id)`.
    ///
    /// Use the `*_locked` methods inside `f`; the locking variants would
    /// deadlock on the same key.
    pub fn with_lock<R>(&self, collection: &str, id: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with_lock(collection, id, f)
    }

    /// Writes `record` if its `updated_at` is not older than the stored one.
    ///
    /// Returns whether the write committed.
    pub fn put_if_newer(&self, collection: &str, record: Record) -> StoreResult<bool> {
        let id = record.id.clone();
        self.with_lock(collection, &id, || self.put_if_newer_locked(collection, record))
    }

    /// [`StoreHandle::put_if_newer`] for callers already holding the lock.
    pub fn put_if_newer_locked(&self, collection: &str, record: Record) -> StoreResult<bool> {
        if let Some(current) = self.store.get(collection, &record.id)? {
            if current.updated_at > record.updated_at {
                debug!(
                    collection,
                    id = %record.id,
                    stored = current.updated_at,
                    incoming = record.updated_at,
                    "rejected older write"
                );
                return Ok(false);
            }
        }
        self.store.put(collection, record)?;
        Ok(true)
    }

    /// Writes `record` unconditionally.
    pub fn put(&self, collection: &str, record: Record) -> StoreResult<()> {
        let id = record.id.clone();
        self.with_lock(collection, &id, || self.store.put(collection, record))
    }

    /// Deletes the record with `id`. Returns whether it existed.
    pub fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.with_lock(collection, id, || self.store.delete(collection, id))
    }

    /// Read-modify-write of one record under its lock.
    ///
    /// `f` receives the current record and returns the record to store, or
    /// `None` to leave the store untouched. Returns what `f` produced.
    pub fn update<F>(&self, collection: &str, id: &str, f: F) -> StoreResult<Option<Record>>
    where
        F: FnOnce(Option<Record>) -> StoreResult<Option<Record>>,
    {
        self.with_lock(collection, id, || {
            let current = self.store.get(collection, id)?;
            let next = f(current)?;
            if let Some(record) = &next {
                self.store.put(collection, record.clone())?;
            }
            Ok(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRecordStore;

    fn handle() -> StoreHandle {
        StoreHandle::new(Arc::new(MemoryRecordStore::new()))
    }

    #[test]
    fn put_if_newer_rejects_older() {
        let h = handle();
        assert!(h.put_if_newer("tasks", Record::new("t1", 10)).unwrap());
        assert!(!h.put_if_newer("tasks", Record::new("t1", 9)).unwrap());
        assert!(h.put_if_newer("tasks", Record::new("t1", 10)).unwrap());
        assert_eq!(h.get("tasks", "t1").unwrap().unwrap().updated_at, 10);
    }

    #[test]
    fn forced_put_overwrites_newer() {
        let h = handle();
        h.put("tasks", Record::new("t1", 10)).unwrap();
        h.put("tasks", Record::new("t1", 3)).unwrap();
        assert_eq!(h.get("tasks", "t1").unwrap().unwrap().updated_at, 3);
    }

    #[test]
    fn update_reads_and_writes() {
        let h = handle();
        h.put("counters", Record::new("c", 1).with_field("n", 1)).unwrap();

        let out = h
            .update("counters", "c", |current| {
                let mut record = current.unwrap();
                let n = record.field("n").and_then(Value::as_i64).unwrap_or(0);
                record.set_field("n", n + 1);
                Ok(Some(record))
            })
            .unwrap();

        assert_eq!(out.unwrap().field("n").unwrap(), 2);
        assert_eq!(h.get("counters", "c").unwrap().unwrap().field("n").unwrap(), 2);
    }

    #[test]
    fn update_returning_none_leaves_store() {
        let h = handle();
        let out = h.update("tasks", "missing", |_| Ok(None)).unwrap();
        assert!(out.is_none());
        assert!(h.get("tasks", "missing").unwrap().is_none());
    }

    #[test]
    fn clones_share_locks() {
        let h = handle();
        let other = h.clone();
        assert!(Arc::ptr_eq(h.locks(), other.locks()));
    }
}
