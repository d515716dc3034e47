//! Sync bookkeeping: the pull cursor and last-known-synced versions.

use crate::error::SyncResult;
use homestead_store::StoreHandle;
use homestead_sync_protocol::collections::SYNC_META;
use homestead_sync_protocol::{now_millis, Record};
use serde_json::Value;

const CURSOR_ID: &str = "cursor";
const VALUE_FIELD: &str = "value";

/// Reads and writes rows in `_sync_meta`.
#[derive(Debug, Clone)]
pub struct SyncMeta {
    handle: StoreHandle,
}

impl SyncMeta {
    /// Creates bookkeeping over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Returns the pull cursor (0 before the first pull).
    pub fn cursor(&self) -> SyncResult<i64> {
        Ok(self.read(CURSOR_ID)?.unwrap_or(0))
    }

    /// Stores the pull cursor.
    pub fn set_cursor(&self, cursor: i64) -> SyncResult<()> {
        self.write(CURSOR_ID, cursor)
    }

    /// Returns the `updatedAt` both sides last agreed on for a record.
    pub fn last_synced(&self, store_name: &str, id: &str) -> SyncResult<Option<i64>> {
        self.read(&version_key(store_name, id))
    }

    /// Records the `updatedAt` both sides agree on for a record.
    pub fn set_last_synced(&self, store_name: &str, id: &str, updated_at: i64) -> SyncResult<()> {
        self.write(&version_key(store_name, id), updated_at)
    }

    /// Forgets the agreed version of a record.
    pub fn clear_last_synced(&self, store_name: &str, id: &str) -> SyncResult<bool> {
        Ok(self.handle.delete(SYNC_META, &version_key(store_name, id))?)
    }

    fn read(&self, key: &str) -> SyncResult<Option<i64>> {
        Ok(self
            .handle
            .get(SYNC_META, key)?
            .and_then(|r| r.field(VALUE_FIELD).and_then(Value::as_i64)))
    }

    fn write(&self, key: &str, value: i64) -> SyncResult<()> {
        let entity = serde_json::json!({ "value": value });
        let record = Record::bookkeeping(key, now_millis(), &entity)?;
        self.handle.put(SYNC_META, record)?;
        Ok(())
    }
}

fn version_key(store_name: &str, id: &str) -> String {
    format!("v:{store_name}:{id}")
}
