//! Record Store contract.

use crate::error::StoreResult;
use homestead_sync_protocol::Record;
use serde_json::Value;

/// A keyed store of opaque records, grouped into named collections.
///
/// Stores do not interpret record payloads. Ordering of `get_all` is by id.
///
/// # Invariants
///
/// - `put` replaces the stored record unconditionally; last-writer-wins
///   gating lives in [`crate::StoreHandle`]
/// - `delete` is idempotent
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryRecordStore`] - For testing
/// - [`super::FileRecordStore`] - For durable storage
pub trait RecordStore: Send + Sync {
    /// Returns the record with `id` in `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>>;

    /// Returns every record in `collection`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>>;

    /// Returns every record whose top-level field `index` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        Ok(self
            .get_all(collection)?
            .into_iter()
            .filter(|r| r.index_value(index).as_ref() == Some(value))
            .collect())
    }

    /// Writes `record` under its id.
    ///
    /// After this returns successfully the write is durable for durable
    /// implementations.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, collection: &str, record: Record) -> StoreResult<()>;

    /// Removes the record with `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Returns the names of all non-empty collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn collections(&self) -> StoreResult<Vec<String>>;
}
