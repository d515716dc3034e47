//! Conflict store and resolver.

use crate::error::{SyncError, SyncResult};
use crate::meta::SyncMeta;
use crate::outbox::Outbox;
use homestead_store::StoreHandle;
use homestead_sync_protocol::collections::SYNC_CONFLICTS;
use homestead_sync_protocol::{
    now_millis, ConflictLog, Operation, Record, Resolution, SyncStatus,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// Persists [`ConflictLog`]s in `_sync_conflicts`.
#[derive(Debug, Clone)]
pub struct ConflictStore {
    handle: StoreHandle,
}

impl ConflictStore {
    /// Creates a conflict store over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Returns the conflict with `id`.
    pub fn get(&self, id: &str) -> SyncResult<Option<ConflictLog>> {
        self.handle
            .get(SYNC_CONFLICTS, id)?
            .map(|r| r.to_entity::<ConflictLog>())
            .transpose()
            .map_err(SyncError::from)
    }

    /// Returns every conflict, newest first.
    pub fn list_all(&self) -> SyncResult<Vec<ConflictLog>> {
        let mut logs = self
            .handle
            .get_all(SYNC_CONFLICTS)?
            .iter()
            .map(Record::to_entity::<ConflictLog>)
            .collect::<Result<Vec<_>, _>>()?;
        logs.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then_with(|| a.id.cmp(&b.id)));
        Ok(logs)
    }

    /// Returns every unresolved conflict, newest first.
    pub fn list_unresolved(&self) -> SyncResult<Vec<ConflictLog>> {
        Ok(self.list_all()?.into_iter().filter(|c| !c.resolved).collect())
    }

    /// Returns the unresolved conflict for a record, if any.
    pub fn unresolved_for(
        &self,
        store_name: &str,
        record_id: &str,
    ) -> SyncResult<Option<ConflictLog>> {
        let records = self
            .handle
            .get_all_by_index(SYNC_CONFLICTS, "recordId", &Value::from(record_id))?;
        for record in &records {
            let log: ConflictLog = record.to_entity()?;
            if log.store_name == store_name && !log.resolved {
                return Ok(Some(log));
            }
        }
        Ok(None)
    }

    /// Returns true if the record is suspended by an unresolved conflict.
    pub fn is_conflicted(&self, store_name: &str, record_id: &str) -> SyncResult<bool> {
        Ok(self.unresolved_for(store_name, record_id)?.is_some())
    }

    /// Records a conflict, or refreshes the remote side of the existing one.
    ///
    /// Returns the stored log and whether it was newly created.
    pub fn record(
        &self,
        store_name: &str,
        record_id: &str,
        local_version: Option<Record>,
        remote_version: Option<Record>,
        remote_updated_at: i64,
    ) -> SyncResult<(ConflictLog, bool)> {
        let key = format!("key:{store_name}:{record_id}");
        self.handle
            .with_lock(SYNC_CONFLICTS, &key, || -> SyncResult<(ConflictLog, bool)> {
                if let Some(mut existing) = self.unresolved_for(store_name, record_id)? {
                    if remote_updated_at > existing.remote_updated_at {
                        existing.remote_version = remote_version;
                        existing.remote_updated_at = remote_updated_at;
                        self.save(&existing)?;
                        debug!(
                            conflict = %existing.id,
                            store = store_name,
                            id = record_id,
                            "refreshed conflict remote side"
                        );
                    }
                    return Ok((existing, false));
                }

                let log = ConflictLog::new(
                    Uuid::new_v4().to_string(),
                    store_name,
                    record_id,
                    local_version,
                    remote_version,
                    remote_updated_at,
                    now_millis(),
                );
                self.save(&log)?;
                info!(conflict = %log.id, store = store_name, id = record_id, "conflict detected");
                Ok((log, true))
            })
    }

    /// Stores a log.
    pub fn save(&self, log: &ConflictLog) -> SyncResult<()> {
        let record = Record::bookkeeping(log.id.clone(), log.detected_at, log)?;
        self.handle.store().put(SYNC_CONFLICTS, record)?;
        Ok(())
    }
}

/// Applies a manual resolution to a conflict.
///
/// Resolution is the only way a conflicted record re-enters normal sync.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    handle: StoreHandle,
    outbox: Outbox,
    meta: SyncMeta,
    conflicts: ConflictStore,
}

impl ConflictResolver {
    /// Creates a resolver over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        Self {
            outbox: Outbox::new(handle.clone()),
            meta: SyncMeta::new(handle.clone()),
            conflicts: ConflictStore::new(handle.clone()),
            handle,
        }
    }

    /// Returns the conflict store.
    pub fn conflicts(&self) -> &ConflictStore {
        &self.conflicts
    }

    /// Resolves conflict `conflict_id`.
    ///
    /// - `LocalWins` re-stamps the local version strictly newer than both
    ///   sides, writes it and queues a fresh upload (or a delete).
    /// - `RemoteWins` writes the remote version exactly (or deletes locally
    ///   for a tombstone) and cancels every outstanding item for the record.
    ///
    /// Both record the remote version as last-known-synced.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> SyncResult<ConflictLog> {
        let log = self
            .conflicts
            .get(conflict_id)?
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
        let store = log.store_name.clone();
        let id = log.record_id.clone();

        // A pull holding this lock may refresh the remote side; read it again.
        let log = self.handle.with_lock(&store, &id, || -> SyncResult<ConflictLog> {
            let mut log = self
                .conflicts
                .get(conflict_id)?
                .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
            if log.resolved {
                return Err(SyncError::AlreadyResolved(conflict_id.to_string()));
            }
            let now = now_millis();
            match resolution {
                Resolution::LocalWins => self.keep_local(&log, now)?,
                Resolution::RemoteWins => self.keep_remote(&log)?,
            }
            log.resolve(resolution, now);
            self.conflicts.save(&log)?;
            Ok(log)
        })?;

        info!(
            conflict = %log.id,
            store = %store,
            id = %id,
            resolution = resolution.as_str(),
            "conflict resolved"
        );
        Ok(log)
    }

    /// Caller holds the record lock.
    fn keep_local(&self, log: &ConflictLog, now: i64) -> SyncResult<()> {
        let (store, id) = (&log.store_name, &log.record_id);
        let local_updated = log.local_version.as_ref().map_or(0, |r| r.updated_at);
        let stamp = now.max(local_updated + 1).max(log.remote_updated_at + 1);

        self.outbox.cancel_outstanding(store, id)?;
        let operation = match &log.local_version {
            Some(local) => {
                let mut winner = local.clone();
                winner.updated_at = stamp;
                winner.sync_status = SyncStatus::Pending;
                self.handle.store().put(store, winner)?;
                Operation::Put
            }
            None => {
                self.handle.store().delete(store, id)?;
                Operation::Delete
            }
        };
        self.meta.set_last_synced(store, id, log.remote_updated_at)?;
        self.outbox.enqueue(store, operation, id, stamp, false)?;
        Ok(())
    }

    /// Caller holds the record lock.
    fn keep_remote(&self, log: &ConflictLog) -> SyncResult<()> {
        let (store, id) = (&log.store_name, &log.record_id);
        match &log.remote_version {
            Some(remote) => {
                let mut winner = remote.clone();
                winner.sync_status = SyncStatus::Synced;
                self.handle.store().put(store, winner)?;
            }
            None => {
                self.handle.store().delete(store, id)?;
            }
        }
        self.outbox.cancel_outstanding(store, id)?;
        self.meta.set_last_synced(store, id, log.remote_updated_at)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestead_store::MemoryRecordStore;
    use homestead_sync_protocol::QueueStatus;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn setup() -> (StoreHandle, ConflictResolver) {
        let handle = StoreHandle::new(Arc::new(MemoryRecordStore::new()));
        let resolver = ConflictResolver::new(handle.clone());
        (handle, resolver)
    }

    fn remote(at: i64, title: &str) -> Record {
        Record::new("t1", at)
            .with_field("title", title)
            .with_status(SyncStatus::Synced)
    }

    #[test]
    fn record_creates_once_and_refreshes() {
        let (_, resolver) = setup();
        let store = resolver.conflicts();

        let (first, created) = store
            .record("tasks", "t1", Some(Record::new("t1", 90)), Some(remote(100, "A")), 100)
            .unwrap();
        assert!(created);

        let (same, created) = store
            .record("tasks", "t1", None, Some(remote(100, "A")), 100)
            .unwrap();
        assert!(!created);
        assert_eq!(same.id, first.id);

        let (refreshed, _) = store
            .record("tasks", "t1", None, Some(remote(120, "B")), 120)
            .unwrap();
        assert_eq!(refreshed.remote_updated_at, 120);
        assert!(refreshed.local_version.is_some());
        assert_eq!(store.list_unresolved().unwrap().len(), 1);
    }

    #[test]
    fn local_wins_restamps_and_requeues() {
        let (handle, resolver) = setup();
        let outbox = Outbox::new(handle.clone());
        let local = Record::new("t1", 90).with_field("title", "B");
        outbox.put_record("tasks", local.clone()).unwrap();

        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", Some(local), Some(remote(100, "A")), 100)
            .unwrap();

        let resolved = resolver.resolve_conflict(&log.id, Resolution::LocalWins).unwrap();
        assert!(resolved.resolved);

        let stored = handle.get("tasks", "t1").unwrap().unwrap();
        assert!(stored.updated_at > 100);
        assert_eq!(stored.field("title").unwrap(), "B");
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let outstanding: Vec<_> = outbox
            .items_for("tasks", "t1")
            .unwrap()
            .into_iter()
            .filter(|i| i.status == QueueStatus::Pending)
            .collect();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].timestamp, stored.updated_at);

        let meta = SyncMeta::new(handle);
        assert_eq!(meta.last_synced("tasks", "t1").unwrap(), Some(100));
    }

    #[test]
    fn remote_wins_overwrites_exactly() {
        let (handle, resolver) = setup();
        let outbox = Outbox::new(handle.clone());
        outbox
            .put_record("tasks", Record::new("t1", 200).with_field("title", "B"))
            .unwrap();

        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", handle.get("tasks", "t1").unwrap(), Some(remote(100, "A")), 100)
            .unwrap();
        resolver.resolve_conflict(&log.id, Resolution::RemoteWins).unwrap();

        assert_eq!(handle.get("tasks", "t1").unwrap().unwrap(), remote(100, "A"));
        assert!(!outbox.has_outstanding("tasks", "t1").unwrap());
        assert!(!resolver.conflicts().is_conflicted("tasks", "t1").unwrap());
    }

    #[test]
    fn resolution_sees_remote_refreshed_under_the_record_lock() {
        let (handle, resolver) = setup();
        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", Some(Record::new("t1", 90)), Some(remote(100, "A")), 100)
            .unwrap();

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let puller = {
            let handle = handle.clone();
            let conflicts = resolver.conflicts().clone();
            thread::spawn(move || {
                handle.with_lock("tasks", "t1", || {
                    locked_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    conflicts
                        .record("tasks", "t1", None, Some(remote(150, "B")), 150)
                        .unwrap();
                });
            })
        };
        locked_rx.recv().unwrap();

        let resolving = {
            let resolver = resolver.clone();
            let id = log.id.clone();
            thread::spawn(move || resolver.resolve_conflict(&id, Resolution::RemoteWins))
        };
        thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();
        puller.join().unwrap();

        let resolved = resolving.join().unwrap().unwrap();
        assert_eq!(resolved.remote_updated_at, 150);
        assert_eq!(handle.get("tasks", "t1").unwrap().unwrap(), remote(150, "B"));
        let meta = SyncMeta::new(handle);
        assert_eq!(meta.last_synced("tasks", "t1").unwrap(), Some(150));
    }

    #[test]
    fn remote_tombstone_wins_deletes() {
        let (handle, resolver) = setup();
        handle.put("tasks", Record::new("t1", 5)).unwrap();
        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", Some(Record::new("t1", 5)), None, 8)
            .unwrap();

        resolver.resolve_conflict(&log.id, Resolution::RemoteWins).unwrap();
        assert!(handle.get("tasks", "t1").unwrap().is_none());
    }

    #[test]
    fn local_delete_wins_requeues_delete() {
        let (handle, resolver) = setup();
        let outbox = Outbox::new(handle.clone());
        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", None, Some(remote(100, "A")), 100)
            .unwrap();

        resolver.resolve_conflict(&log.id, Resolution::LocalWins).unwrap();
        assert_eq!(
            outbox.outstanding_operation("tasks", "t1").unwrap(),
            Some(Operation::Delete)
        );
    }

    #[test]
    fn resolving_twice_or_unknown_fails() {
        let (_, resolver) = setup();
        assert!(matches!(
            resolver.resolve_conflict("nope", Resolution::LocalWins),
            Err(SyncError::ConflictNotFound(_))
        ));

        let (log, _) = resolver
            .conflicts()
            .record("tasks", "t1", None, None, 1)
            .unwrap();
        resolver.resolve_conflict(&log.id, Resolution::RemoteWins).unwrap();
        assert!(matches!(
            resolver.resolve_conflict(&log.id, Resolution::RemoteWins),
            Err(SyncError::AlreadyResolved(_))
        ));
        assert_eq!(resolver.conflicts().list_all().unwrap().len(), 1);
    }
}
