//! End-to-end sync between devices through the reference replica.

use homestead_store::{MemoryRecordStore, StoreHandle};
use homestead_sync_engine::{
    HttpTransport, LoopbackClient, LoopbackServer, MockTransport, SyncConfig, SyncEngine,
    SyncError, SyncState,
};
use homestead_sync_protocol::{
    PullResponse, QueueStatus, Record, RemoteRow, Resolution, RowKey, SyncStatus,
};
use homestead_sync_server::{ServerConfig, SyncServer};
use homestead_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Routes loopback requests into an in-process replica.
struct Replica(Arc<SyncServer>);

impl LoopbackServer for Replica {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

type Device = SyncEngine<HttpTransport<LoopbackClient<Replica>>>;

fn replica() -> Arc<SyncServer> {
    Arc::new(SyncServer::new(ServerConfig::default()))
}

fn device_on(server: &Arc<SyncServer>, config: SyncConfig, handle: StoreHandle) -> Device {
    let client = LoopbackClient::new(Replica(Arc::clone(server)));
    let transport = HttpTransport::new(config.server_url.clone(), client);
    SyncEngine::new(config, Arc::new(transport), handle)
}

fn device(server: &Arc<SyncServer>, name: &str) -> Device {
    device_on(
        server,
        SyncConfig::new(name, "alice", "loopback://replica"),
        StoreHandle::new(Arc::new(MemoryRecordStore::new())),
    )
}

fn title(engine: &Device, id: &str) -> Option<String> {
    engine
        .handle()
        .get("tasks", id)
        .unwrap()
        .and_then(|r| r.field("title").and_then(|v| v.as_str()).map(str::to_string))
}

#[tokio::test]
async fn change_flows_between_devices() {
    let server = replica();
    let a = device(&server, "device-a");
    let b = device(&server, "device-b");

    a.outbox().put_record("tasks", task("t1", 10, "Plant beans")).unwrap();
    let report = a.run_sync_cycle().await.unwrap();
    assert!(report.success);
    assert_eq!(report.pushed, 1);
    assert_eq!(server.row_count(), 1);

    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(title(&b, "t1").as_deref(), Some("Plant beans"));
    let pulled = b.handle().get("tasks", "t1").unwrap().unwrap();
    assert_eq!(pulled.sync_status, SyncStatus::Synced);
    assert_eq!(pulled.updated_at, 10);

    // A pulls its own row back without touching anything.
    let report = a.run_sync_cycle().await.unwrap();
    assert_eq!(report.pulled, 0);
    assert_eq!(report.conflicts, 0);
}

#[tokio::test]
async fn delete_propagates_as_tombstone() {
    let server = replica();
    let a = device(&server, "device-a");
    let b = device(&server, "device-b");

    a.outbox().put_record("tasks", task("t1", 10, "Feed goats")).unwrap();
    a.run_sync_cycle().await.unwrap();
    b.run_sync_cycle().await.unwrap();
    assert!(title(&b, "t1").is_some());

    assert!(a.outbox().delete_record("tasks", "t1").unwrap());
    let report = a.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(server.replica().get(&RowKey::new("tasks", "t1")).unwrap().deleted);

    b.run_sync_cycle().await.unwrap();
    assert!(b.handle().get("tasks", "t1").unwrap().is_none());
}

#[tokio::test]
async fn collapsed_writes_upload_once() {
    let transport = Arc::new(MockTransport::new());
    let handle = StoreHandle::new(Arc::new(MemoryRecordStore::new()));
    let engine = SyncEngine::new(
        SyncConfig::new("device-a", "alice", "mock://"),
        Arc::clone(&transport),
        handle,
    );

    for at in 1..=5 {
        engine
            .outbox()
            .put_record("tasks", task("t1", at, &format!("v{at}")))
            .unwrap();
    }
    engine.outbox().put_record("tasks", task("t2", 3, "other")).unwrap();

    let report = engine.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 2);

    let rows = transport.pushed_rows();
    let t1: Vec<_> = rows.iter().filter(|r| r.id == "t1").collect();
    assert_eq!(t1.len(), 1);
    assert_eq!(t1[0].updated_at, 5);
    let record = Record::from_blob(t1[0].data.as_deref().unwrap()).unwrap();
    assert_eq!(record.field("title").unwrap(), "v5");
    assert!(!engine.outbox().has_outstanding("tasks", "t1").unwrap());
}

/// A edits at 100 and syncs; B edited at 90 while offline.
async fn conflicted_pair(server: &Arc<SyncServer>) -> (Device, Device) {
    let a = device(server, "device-a");
    let b = device(server, "device-b");

    a.outbox().put_record("tasks", task("t1", 100, "From A")).unwrap();
    a.run_sync_cycle().await.unwrap();

    b.outbox().put_record("tasks", task("t1", 90, "From B")).unwrap();
    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.conflicts, 1);
    (a, b)
}

#[tokio::test]
async fn concurrent_edit_logs_one_conflict_without_overwrite() {
    let server = replica();
    let (_a, b) = conflicted_pair(&server).await;

    let conflicts = b.conflicts().list_unresolved().unwrap();
    assert_eq!(conflicts.len(), 1);
    let log = &conflicts[0];
    assert_eq!(log.store_name, "tasks");
    assert_eq!(log.record_id, "t1");
    assert_eq!(log.local_version.as_ref().unwrap().updated_at, 90);
    assert_eq!(log.remote_version.as_ref().unwrap().updated_at, 100);
    assert!(!log.resolved);

    // Neither side was overwritten.
    assert_eq!(title(&b, "t1").as_deref(), Some("From B"));
    let remote = server.replica().get(&RowKey::new("tasks", "t1")).unwrap();
    assert_eq!(remote.updated_at, 100);

    // The id stays suspended and no second log appears.
    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.suspended, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(b.conflicts().list_all().unwrap().len(), 1);
}

#[tokio::test]
async fn local_wins_reaches_the_replica() {
    let server = replica();
    let (a, b) = conflicted_pair(&server).await;
    let conflict = b.conflicts().list_unresolved().unwrap().remove(0);

    let resolved = b.resolve_conflict(&conflict.id, Resolution::LocalWins).unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolution, Some(Resolution::LocalWins));

    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);

    let local = b.handle().get("tasks", "t1").unwrap().unwrap();
    let remote = server.replica().get(&RowKey::new("tasks", "t1")).unwrap();
    assert!(local.updated_at > 100);
    assert_eq!(remote.updated_at, local.updated_at);
    let remote_record = Record::from_blob(remote.data.as_deref().unwrap()).unwrap();
    assert_eq!(remote_record.field("title").unwrap(), "From B");

    a.run_sync_cycle().await.unwrap();
    assert_eq!(title(&a, "t1").as_deref(), Some("From B"));
    assert!(b.conflicts().list_unresolved().unwrap().is_empty());
}

#[tokio::test]
async fn remote_wins_adopts_remote_version() {
    let server = replica();
    let (_a, b) = conflicted_pair(&server).await;
    let conflict = b.conflicts().list_unresolved().unwrap().remove(0);

    b.resolve_conflict(&conflict.id, Resolution::RemoteWins).unwrap();

    let local = b.handle().get("tasks", "t1").unwrap().unwrap();
    assert_eq!(local.updated_at, 100);
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(title(&b, "t1").as_deref(), Some("From A"));
    assert!(!b.outbox().has_outstanding("tasks", "t1").unwrap());

    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.conflicts, 0);
    assert!(matches!(
        b.resolve_conflict(&conflict.id, Resolution::LocalWins),
        Err(SyncError::AlreadyResolved(_))
    ));
}

#[tokio::test]
async fn edit_hidden_behind_the_cursor_becomes_a_conflict() {
    let server = replica();
    let a = device(&server, "device-a");
    let b = device(&server, "device-b");

    a.outbox().put_record("tasks", task("t1", 10, "Original")).unwrap();
    a.outbox().put_record("tasks", task("t2", 100, "Other")).unwrap();
    a.run_sync_cycle().await.unwrap();
    b.run_sync_cycle().await.unwrap();
    assert_eq!(b.meta().cursor().unwrap(), 100);

    // A's offline edit lands below B's cursor, so B never pulls it.
    a.outbox().put_record("tasks", task("t1", 60, "From A")).unwrap();
    assert_eq!(a.run_sync_cycle().await.unwrap().pushed, 1);

    b.outbox().put_record("tasks", task("t1", 120, "From B")).unwrap();
    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.conflicts, 1);

    let conflict = b.conflicts().unresolved_for("tasks", "t1").unwrap().unwrap();
    assert_eq!(conflict.remote_updated_at, 60);
    let remote = conflict.remote_version.as_ref().unwrap();
    assert_eq!(remote.field("title").unwrap(), "From A");
    assert_eq!(conflict.local_version.as_ref().unwrap().updated_at, 120);

    // Held back rather than pushed again every cycle.
    let report = b.run_sync_cycle().await.unwrap();
    assert_eq!(report.suspended, 1);
    assert_eq!(report.stale, 0);

    b.resolve_conflict(&conflict.id, Resolution::LocalWins).unwrap();
    assert_eq!(b.run_sync_cycle().await.unwrap().pushed, 1);
    a.run_sync_cycle().await.unwrap();
    assert_eq!(title(&a, "t1").as_deref(), Some("From B"));
}

#[tokio::test]
async fn concurrent_cycles_are_single_flight() {
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Duration::from_millis(50));
    let engine = SyncEngine::new(
        SyncConfig::new("device-a", "alice", "mock://"),
        Arc::clone(&transport),
        StoreHandle::new(Arc::new(MemoryRecordStore::new())),
    );

    let (first, second) = tokio::join!(engine.run_sync_cycle(), engine.run_sync_cycle());
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SyncError::CycleBusy)))
            .count(),
        1
    );
    assert_eq!(engine.stats().cycles_completed, 1);
}

#[tokio::test]
async fn offline_cycle_keeps_items_pending() {
    let server = replica();
    let a = device(&server, "device-a");
    a.outbox().put_record("tasks", task("t1", 10, "Mulch")).unwrap();

    a.transport().client().set_healthy(false);
    let report = a.run_sync_cycle().await.unwrap();
    assert!(!report.success);
    assert!(!report.errors.is_empty());
    assert_eq!(a.state(), SyncState::Error);
    let items = a.outbox().list_by_status(QueueStatus::Pending).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 0);

    a.transport().client().set_healthy(true);
    let report = a.run_sync_cycle().await.unwrap();
    assert!(report.success);
    assert_eq!(report.pushed, 1);
}

#[tokio::test]
async fn owners_are_isolated() {
    let server = replica();
    let alice = device(&server, "device-a");
    let bob = device_on(
        &server,
        SyncConfig::new("device-b", "bob", "loopback://replica"),
        StoreHandle::new(Arc::new(MemoryRecordStore::new())),
    );

    alice.outbox().put_record("tasks", task("t1", 10, "Private")).unwrap();
    alice.run_sync_cycle().await.unwrap();

    let report = bob.run_sync_cycle().await.unwrap();
    assert_eq!(report.pulled, 0);
    assert!(bob.handle().get("tasks", "t1").unwrap().is_none());
}

#[tokio::test]
async fn token_auth_gates_the_handshake() {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_auth(b"replica-secret".to_vec()),
    ));

    let anonymous = device(&server, "device-a");
    let report = anonymous.run_sync_cycle().await.unwrap();
    assert!(!report.success);
    assert!(anonymous.stats().last_error.unwrap().contains("authentication"));

    let token = server.issue_token("alice").unwrap();
    let trusted = device_on(
        &server,
        SyncConfig::new("device-b", "alice", "loopback://replica").with_token(token),
        StoreHandle::new(Arc::new(MemoryRecordStore::new())),
    );
    trusted.outbox().put_record("tasks", task("t1", 10, "Signed")).unwrap();
    let report = trusted.run_sync_cycle().await.unwrap();
    assert!(report.success);
    assert_eq!(report.pushed, 1);
}

#[tokio::test]
async fn outbox_survives_restart() {
    let server = replica();
    let store = TestStore::file();

    {
        let engine = device_on(
            &server,
            SyncConfig::new("device-a", "alice", "loopback://replica"),
            store.handle.clone(),
        );
        engine.outbox().put_record("tasks", task("t1", 10, "Durable")).unwrap();
    }

    let store = store.reopen();
    let engine = device_on(
        &server,
        SyncConfig::new("device-a", "alice", "loopback://replica"),
        store.handle.clone(),
    );
    assert!(engine.outbox().has_outstanding("tasks", "t1").unwrap());
    assert_eq!(title(&engine, "t1").as_deref(), Some("Durable"));

    let report = engine.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(server.row_count(), 1);
}

#[tokio::test]
async fn write_without_queue_entry_is_recovered_after_restart() {
    let server = replica();
    let store = TestStore::file();

    // The data write committed but the process died before queueing it.
    store
        .handle
        .put("tasks", task("t1", 10, "Half written").with_status(SyncStatus::Pending))
        .unwrap();

    let store = store.reopen();
    let engine = device_on(
        &server,
        SyncConfig::new("device-a", "alice", "loopback://replica"),
        store.handle.clone(),
    );
    assert!(!engine.outbox().has_outstanding("tasks", "t1").unwrap());

    assert_eq!(engine.recover().unwrap(), 1);
    assert!(engine.outbox().has_outstanding("tasks", "t1").unwrap());

    let report = engine.run_sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(server.row_count(), 1);
    let stored = engine.handle().get("tasks", "t1").unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(engine.recover().unwrap(), 0);
}

/// One row per id (newest wins), ordered the way the replica pages them.
fn as_page(delta: Vec<RemoteRow>) -> PullResponse {
    let mut newest: BTreeMap<String, RemoteRow> = BTreeMap::new();
    for row in delta {
        match newest.get(&row.id) {
            Some(existing) if existing.updated_at >= row.updated_at => {}
            _ => {
                newest.insert(row.id.clone(), row);
            }
        }
    }
    let mut rows: Vec<RemoteRow> = newest.into_values().collect();
    rows.sort_by_key(|r| r.updated_at);
    let cursor = rows.last().map_or(0, |r| r.updated_at);
    PullResponse {
        rows,
        cursor,
        has_more: false,
    }
}

fn snapshot(engine: &SyncEngine<MockTransport>) -> Vec<Record> {
    engine.handle().get_all("tasks").unwrap()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn pull_is_idempotent(delta in remote_delta_strategy(24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let transport = Arc::new(MockTransport::new());
            let engine = SyncEngine::new(
                SyncConfig::new("device-a", "alice", "mock://"),
                Arc::clone(&transport),
                StoreHandle::new(Arc::new(MemoryRecordStore::new())),
            );
            let page = as_page(delta);

            transport.push_pull_page(page.clone());
            engine.run_sync_cycle().await.unwrap();
            let once = snapshot(&engine);

            transport.push_pull_page(page);
            let report = engine.run_sync_cycle().await.unwrap();
            prop_assert_eq!(report.pulled, 0);
            prop_assert_eq!(snapshot(&engine), once);
            Ok(())
        })?;
    }

    #[test]
    fn pending_writes_collapse_to_latest(stamps in prop::collection::vec(1i64..10_000, 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let transport = Arc::new(MockTransport::new());
            let engine = SyncEngine::new(
                SyncConfig::new("device-a", "alice", "mock://"),
                Arc::clone(&transport),
                StoreHandle::new(Arc::new(MemoryRecordStore::new())),
            );
            for at in &stamps {
                engine.outbox().put_record("tasks", task("t1", *at, "x")).unwrap();
            }
            engine.run_sync_cycle().await.unwrap();

            let rows = transport.pushed_rows();
            prop_assert_eq!(rows.len(), 1);
            prop_assert_eq!(rows[0].updated_at, *stamps.iter().max().unwrap());
            Ok(())
        })?;
    }
}
