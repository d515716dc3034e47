//! In-memory record store for testing.

use crate::backend::RecordStore;
use crate::error::StoreResult;
use homestead_sync_protocol::Record;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// An in-memory record store.
///
/// Suitable for unit tests, integration tests and ephemeral replicas.
/// Thread-safe; share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use homestead_store::{MemoryRecordStore, RecordStore};
/// use homestead_sync_protocol::Record;
///
/// let store = MemoryRecordStore::new();
/// store.put("tasks", Record::new("t1", 1)).unwrap();
/// assert!(store.get("tasks", "t1").unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Record>>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if `collection` holds no records.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put(&self, collection: &str, record: Record) -> StoreResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut collections = self.collections.write();
        let Some(records) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let existed = records.remove(id).is_some();
        if records.is_empty() {
            collections.remove(collection);
        }
        Ok(existed)
    }

    fn collections(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}
