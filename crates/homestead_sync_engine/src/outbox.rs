//! Change interceptor and durable outbox.
//!
//! Every committed local write is followed by [`Outbox::record_change`],
//! which appends a [`SyncQueueItem`] to `_sync_queue` in the same store as
//! the data, or coalesces into an existing pending item for that record.

use crate::error::{SyncError, SyncResult};
use homestead_store::StoreHandle;
use homestead_sync_protocol::collections::{is_reserved, SYNC_QUEUE};
use homestead_sync_protocol::{
    now_millis, Operation, QueueStatus, Record, SyncQueueItem, SyncStatus,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// The change interceptor plus operator helpers over `_sync_queue`.
#[derive(Debug, Clone)]
pub struct Outbox {
    handle: StoreHandle,
}

impl Outbox {
    /// Creates an outbox over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Returns the store handle.
    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Records that `(store_name, id)` changed locally.
    ///
    /// Call right after the local write commits. Coalesces into an existing
    /// pending item for the same record; otherwise appends a new one.
    pub fn record_change(
        &self,
        store_name: &str,
        operation: Operation,
        id: &str,
    ) -> SyncResult<SyncQueueItem> {
        if is_reserved(store_name) {
            return Err(SyncError::ReservedCollection(store_name.to_string()));
        }
        self.enqueue(store_name, operation, id, now_millis(), true)
    }

    /// Writes `record` locally as `pending` and records the change.
    ///
    /// The write only commits when the record is not older than the stored
    /// one. Returns whether it committed.
    pub fn put_record(&self, store_name: &str, mut record: Record) -> SyncResult<bool> {
        if is_reserved(store_name) {
            return Err(SyncError::ReservedCollection(store_name.to_string()));
        }
        record.sync_status = SyncStatus::Pending;
        let id = record.id.clone();
        self.handle.with_lock(store_name, &id, || -> SyncResult<bool> {
            if !self.handle.put_if_newer_locked(store_name, record)? {
                return Ok(false);
            }
            self.record_change(store_name, Operation::Put, &id)?;
            Ok(true)
        })
    }

    /// Deletes a record locally and records the change.
    ///
    /// Returns whether the record existed.
    pub fn delete_record(&self, store_name: &str, id: &str) -> SyncResult<bool> {
        if is_reserved(store_name) {
            return Err(SyncError::ReservedCollection(store_name.to_string()));
        }
        self.handle.with_lock(store_name, id, || -> SyncResult<bool> {
            if !self.handle.store().delete(store_name, id)? {
                return Ok(false);
            }
            self.record_change(store_name, Operation::Delete, id)?;
            Ok(true)
        })
    }

    /// Appends (or coalesces) an item stamped no earlier than `at`.
    pub(crate) fn enqueue(
        &self,
        store_name: &str,
        operation: Operation,
        id: &str,
        at: i64,
        coalesce: bool,
    ) -> SyncResult<SyncQueueItem> {
        self.with_key_lock(store_name, id, || -> SyncResult<SyncQueueItem> {
            let existing = self.items_for(store_name, id)?;
            let latest = existing
                .iter()
                .filter(|i| i.status.is_outstanding())
                .map(|i| i.timestamp)
                .max();
            let timestamp = latest.map_or(at, |ts| at.max(ts + 1));

            let pending = existing
                .into_iter()
                .filter(|i| i.status == QueueStatus::Pending)
                .max_by_key(|i| i.timestamp);

            let item = match pending {
                Some(mut item) if coalesce => {
                    item.operation = operation;
                    item.timestamp = timestamp;
                    debug!(
                        store = store_name,
                        id,
                        item = %item.id,
                        op = operation.as_str(),
                        "coalesced outbox item"
                    );
                    item
                }
                _ => {
                    let item = SyncQueueItem::new(
                        Uuid::new_v4().to_string(),
                        store_name,
                        operation,
                        id,
                        timestamp,
                    );
                    debug!(
                        store = store_name,
                        id,
                        item = %item.id,
                        op = operation.as_str(),
                        "queued outbox item"
                    );
                    item
                }
            };
            self.write_item(&item)?;
            Ok(item)
        })
    }

    /// Returns every item, ordered by `(timestamp, id)`.
    pub fn list(&self) -> SyncResult<Vec<SyncQueueItem>> {
        let mut items = self
            .handle
            .get_all(SYNC_QUEUE)?
            .iter()
            .map(Record::to_entity::<SyncQueueItem>)
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Returns every item with `status`.
    pub fn list_by_status(&self, status: QueueStatus) -> SyncResult<Vec<SyncQueueItem>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|i| i.status == status)
            .collect())
    }

    /// Returns the item with `item_id`.
    pub fn get(&self, item_id: &str) -> SyncResult<Option<SyncQueueItem>> {
        self.handle
            .get(SYNC_QUEUE, item_id)?
            .map(|r| r.to_entity::<SyncQueueItem>())
            .transpose()
            .map_err(SyncError::from)
    }

    /// Returns every item targeting `(store_name, id)`.
    pub fn items_for(&self, store_name: &str, id: &str) -> SyncResult<Vec<SyncQueueItem>> {
        let records = self
            .handle
            .get_all_by_index(SYNC_QUEUE, "payloadRef", &Value::from(id))?;
        let mut items = Vec::with_capacity(records.len());
        for record in &records {
            let item: SyncQueueItem = record.to_entity()?;
            if item.store_name == store_name {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Returns true if a non-done item exists for `(store_name, id)`.
    pub fn has_outstanding(&self, store_name: &str, id: &str) -> SyncResult<bool> {
        Ok(self
            .items_for(store_name, id)?
            .iter()
            .any(|i| i.status.is_outstanding()))
    }

    /// Returns the latest outstanding operation for `(store_name, id)`.
    pub fn outstanding_operation(
        &self,
        store_name: &str,
        id: &str,
    ) -> SyncResult<Option<Operation>> {
        Ok(self
            .items_for(store_name, id)?
            .into_iter()
            .filter(|i| i.status.is_outstanding())
            .max_by_key(|i| i.timestamp)
            .map(|i| i.operation))
    }

    /// Applies `f` to an item under its record lock and stores the result.
    ///
    /// Returns the updated item, or `None` if it no longer exists.
    pub fn update_item<F>(&self, item: &SyncQueueItem, f: F) -> SyncResult<Option<SyncQueueItem>>
    where
        F: FnOnce(&mut SyncQueueItem),
    {
        let (store_name, id) = (&item.store_name, &item.payload_ref);
        self.with_key_lock(store_name, id, || -> SyncResult<Option<SyncQueueItem>> {
            let Some(mut current) = self.get(&item.id)? else {
                return Ok(None);
            };
            f(&mut current);
            self.write_item(&current)?;
            Ok(Some(current))
        })
    }

    /// Resets every `failed` item to `pending` with its attempt count reset.
    pub fn retry_failed(&self) -> SyncResult<usize> {
        let mut count = 0;
        for item in self.list_by_status(QueueStatus::Failed)? {
            let updated = self.update_item(&item, |i| {
                if i.status == QueueStatus::Failed {
                    i.status = QueueStatus::Pending;
                    i.attempts = 0;
                    i.next_attempt_at = None;
                    i.error = None;
                }
            })?;
            if updated.is_some_and(|i| i.status == QueueStatus::Pending) {
                count += 1;
            }
        }
        debug!(count, "reset failed outbox items");
        Ok(count)
    }

    /// Removes one item. Returns whether it existed.
    pub fn clear_item(&self, item_id: &str) -> SyncResult<bool> {
        let Some(item) = self.get(item_id)? else {
            return Ok(false);
        };
        self.with_key_lock(&item.store_name, &item.payload_ref, || -> SyncResult<bool> {
            Ok(self.handle.store().delete(SYNC_QUEUE, item_id)?)
        })
    }

    /// Removes every `done` item. Returns how many were removed.
    pub fn compact(&self) -> SyncResult<usize> {
        let mut count = 0;
        for item in self.list_by_status(QueueStatus::Done)? {
            if self.clear_item(&item.id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Queues an upload for every `pending` record without an outstanding item.
    ///
    /// Picks up writes that committed just before a crash cut off their
    /// [`Outbox::record_change`]. A lost delete leaves no record behind and
    /// cannot be found this way.
    pub fn requeue_orphans(&self) -> SyncResult<usize> {
        let mut count = 0;
        for collection in self.handle.store().collections()? {
            if is_reserved(&collection) {
                continue;
            }
            for record in self.handle.get_all(&collection)? {
                if record.sync_status != SyncStatus::Pending {
                    continue;
                }
                let queued = self.handle.with_lock(&collection, &record.id, || -> SyncResult<bool> {
                    let still_pending = self
                        .handle
                        .get(&collection, &record.id)?
                        .is_some_and(|r| r.sync_status == SyncStatus::Pending);
                    if !still_pending || self.has_outstanding(&collection, &record.id)? {
                        return Ok(false);
                    }
                    self.enqueue(&collection, Operation::Put, &record.id, record.updated_at, true)?;
                    Ok(true)
                })?;
                if queued {
                    debug!(store = %collection, id = %record.id, "requeued orphaned write");
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Resets items left `processing` by an interrupted cycle.
    pub fn recover_in_flight(&self) -> SyncResult<usize> {
        let mut count = 0;
        for item in self.list_by_status(QueueStatus::Processing)? {
            self.update_item(&item, |i| {
                if i.status == QueueStatus::Processing {
                    i.status = QueueStatus::Pending;
                }
            })?;
            count += 1;
        }
        Ok(count)
    }

    /// Marks every outstanding item for `(store_name, id)` done.
    pub fn cancel_outstanding(&self, store_name: &str, id: &str) -> SyncResult<usize> {
        self.with_key_lock(store_name, id, || -> SyncResult<usize> {
            let mut count = 0;
            for mut item in self.items_for(store_name, id)? {
                if item.status.is_outstanding() {
                    item.status = QueueStatus::Done;
                    item.error = Some("cancelled".into());
                    self.write_item(&item)?;
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    fn write_item(&self, item: &SyncQueueItem) -> SyncResult<()> {
        let record = Record::bookkeeping(item.id.clone(), item.timestamp, item)?;
        self.handle.store().put(SYNC_QUEUE, record)?;
        Ok(())
    }

    fn with_key_lock<R>(&self, store_name: &str, id: &str, f: impl FnOnce() -> R) -> R {
        self.handle
            .with_lock(SYNC_QUEUE, &format!("key:{store_name}:{id}"), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestead_store::MemoryRecordStore;
    use std::sync::Arc;

    fn outbox() -> Outbox {
        Outbox::new(StoreHandle::new(Arc::new(MemoryRecordStore::new())))
    }

    #[test]
    fn record_change_appends_item() {
        let outbox = outbox();
        let item = outbox.record_change("tasks", Operation::Put, "t1").unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.key(), ("tasks", "t1"));
        assert_eq!(outbox.list().unwrap(), vec![item]);
    }

    #[test]
    fn pending_item_is_coalesced() {
        let outbox = outbox();
        let first = outbox.record_change("tasks", Operation::Put, "t1").unwrap();
        let second = outbox.record_change("tasks", Operation::Delete, "t1").unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(second.operation, Operation::Delete);
        assert_eq!(outbox.list().unwrap().len(), 1);
    }

    #[test]
    fn processing_item_is_not_coalesced() {
        let outbox = outbox();
        let first = outbox.record_change("tasks", Operation::Put, "t1").unwrap();
        outbox
            .update_item(&first, |i| i.status = QueueStatus::Processing)
            .unwrap();

        let second = outbox.record_change("tasks", Operation::Put, "t1").unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(outbox.items_for("tasks", "t1").unwrap().len(), 2);
    }

    #[test]
    fn reserved_collections_are_refused() {
        let outbox = outbox();
        assert!(matches!(
            outbox.record_change("_sync_meta", Operation::Put, "x"),
            Err(SyncError::ReservedCollection(_))
        ));
    }

    #[test]
    fn put_record_marks_pending_and_queues() {
        let outbox = outbox();
        let record = Record::new("t1", 10).with_status(SyncStatus::Synced);
        assert!(outbox.put_record("tasks", record).unwrap());

        let stored = outbox.handle().get("tasks", "t1").unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert!(outbox.has_outstanding("tasks", "t1").unwrap());

        assert!(!outbox.put_record("tasks", Record::new("t1", 5)).unwrap());
        assert_eq!(outbox.list().unwrap().len(), 1);
    }

    #[test]
    fn delete_record_queues_only_existing() {
        let outbox = outbox();
        assert!(!outbox.delete_record("tasks", "missing").unwrap());
        assert!(outbox.list().unwrap().is_empty());

        outbox.put_record("tasks", Record::new("t1", 1)).unwrap();
        assert!(outbox.delete_record("tasks", "t1").unwrap());
        assert_eq!(
            outbox.outstanding_operation("tasks", "t1").unwrap(),
            Some(Operation::Delete)
        );
    }

    #[test]
    fn operator_helpers() {
        let outbox = outbox();
        let a = outbox.record_change("tasks", Operation::Put, "a").unwrap();
        let b = outbox.record_change("tasks", Operation::Put, "b").unwrap();
        let c = outbox.record_change("tasks", Operation::Put, "c").unwrap();

        outbox
            .update_item(&a, |i| {
                i.status = QueueStatus::Failed;
                i.attempts = 5;
                i.error = Some("boom".into());
            })
            .unwrap();
        outbox.update_item(&b, |i| i.status = QueueStatus::Done).unwrap();
        outbox
            .update_item(&c, |i| i.status = QueueStatus::Processing)
            .unwrap();

        assert_eq!(outbox.list_by_status(QueueStatus::Failed).unwrap().len(), 1);

        assert_eq!(outbox.retry_failed().unwrap(), 1);
        let a = outbox.get(&a.id).unwrap().unwrap();
        assert_eq!(a.status, QueueStatus::Pending);
        assert_eq!(a.attempts, 0);
        assert!(a.error.is_none());

        assert_eq!(outbox.recover_in_flight().unwrap(), 1);
        assert_eq!(outbox.get(&c.id).unwrap().unwrap().status, QueueStatus::Pending);

        assert_eq!(outbox.compact().unwrap(), 1);
        assert!(outbox.get(&b.id).unwrap().is_none());

        assert!(outbox.clear_item(&c.id).unwrap());
        assert!(!outbox.clear_item(&c.id).unwrap());
    }

    #[test]
    fn orphaned_pending_writes_are_requeued() {
        let outbox = outbox();
        let handle = outbox.handle().clone();
        handle.put("tasks", Record::new("lost", 7)).unwrap();
        handle
            .put("tasks", Record::new("clean", 3).with_status(SyncStatus::Synced))
            .unwrap();
        outbox.put_record("tasks", Record::new("queued", 5)).unwrap();

        assert_eq!(outbox.requeue_orphans().unwrap(), 1);
        let items = outbox.items_for("tasks", "lost").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, Operation::Put);
        assert_eq!(items[0].timestamp, 7);
        assert!(!outbox.has_outstanding("tasks", "clean").unwrap());
        assert_eq!(outbox.items_for("tasks", "queued").unwrap().len(), 1);

        assert_eq!(outbox.requeue_orphans().unwrap(), 0);
    }

    #[test]
    fn cancel_outstanding_marks_done() {
        let outbox = outbox();
        outbox.record_change("tasks", Operation::Put, "t1").unwrap();
        outbox.record_change("tasks", Operation::Put, "t2").unwrap();

        assert_eq!(outbox.cancel_outstanding("tasks", "t1").unwrap(), 1);
        assert!(!outbox.has_outstanding("tasks", "t1").unwrap());
        assert!(outbox.has_outstanding("tasks", "t2").unwrap());
    }
}
