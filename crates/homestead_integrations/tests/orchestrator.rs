//! End-to-end orchestrator behavior with fake and HTTP-backed adapters.

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use homestead_integrations::{
    AdapterError, AdapterRegistry, DeviceStatus, IntegrationAdapter, IntegrationConfig,
    IntegrationError, IntegrationOrchestrator, IntegrationStatus, IntegrationType, LogAction,
    LogStatus, OrchestratorConfig, SensorDevice, SensorReading, SyncOutcome, SENSOR_DEVICES,
    SENSOR_READINGS,
};
use homestead_store::StoreHandle;
use homestead_sync_engine::{HttpTransport, LoopbackClient, LoopbackServer, SyncConfig, SyncEngine};
use homestead_sync_protocol::collections::SYNC_QUEUE;
use homestead_sync_server::{ServerConfig, SyncServer};
use homestead_testkit::TestStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Returns a fixed payload, or fails while `failing` is set.
struct Scripted {
    id: &'static str,
    kind: IntegrationType,
    payload: Value,
    failing: AtomicBool,
}

impl Scripted {
    fn sensors(id: &'static str, payload: Value) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind: IntegrationType::SensorHardware,
            payload,
            failing: AtomicBool::new(false),
        })
    }

    fn failing(id: &'static str) -> Arc<Self> {
        let adapter = Self::sensors(id, json!([]));
        adapter.failing.store(true, Ordering::SeqCst);
        adapter
    }
}

#[async_trait]
impl IntegrationAdapter for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.id
    }

    fn kind(&self) -> IntegrationType {
        self.kind
    }

    async fn fetch(&self, _config: &IntegrationConfig) -> Result<Value, AdapterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::Status(503));
        }
        Ok(self.payload.clone())
    }
}

/// Never answers within any reasonable timeout.
struct Hanging;

#[async_trait]
impl IntegrationAdapter for Hanging {
    fn id(&self) -> &str {
        "hanging"
    }

    fn name(&self) -> &str {
        "Hanging"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::Generic
    }

    async fn fetch(&self, _config: &IntegrationConfig) -> Result<Value, AdapterError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    }
}

struct Panicking;

#[async_trait]
impl IntegrationAdapter for Panicking {
    fn id(&self) -> &str {
        "panicking"
    }

    fn name(&self) -> &str {
        "Panicking"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::Generic
    }

    async fn fetch(&self, _config: &IntegrationConfig) -> Result<Value, AdapterError> {
        panic!("adapter bug");
    }
}

/// Blocks inside `fetch` until released.
struct Gated {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl IntegrationAdapter for Gated {
    fn id(&self) -> &str {
        "gated"
    }

    fn name(&self) -> &str {
        "Gated"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::SensorHardware
    }

    async fn fetch(&self, _config: &IntegrationConfig) -> Result<Value, AdapterError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(json!([{"externalId": "g1", "type": "temp", "value": 1.5, "unit": "C"}]))
    }
}

fn orchestrator(store: &TestStore, registry: AdapterRegistry) -> Arc<IntegrationOrchestrator> {
    let config = OrchestratorConfig::default().with_fetch_timeout(Duration::from_millis(200));
    Arc::new(IntegrationOrchestrator::new(
        store.handle.clone(),
        registry,
        config,
    ))
}

fn add(orchestrator: &IntegrationOrchestrator, id: &str, provider: &str) -> IntegrationConfig {
    let config = IntegrationConfig::new(id, provider, IntegrationType::SensorHardware).with_id(id);
    orchestrator.repository().create(config).unwrap()
}

fn devices(store: &TestStore) -> Vec<SensorDevice> {
    store
        .get_all(SENSOR_DEVICES)
        .unwrap()
        .iter()
        .map(|r| SensorDevice::from_record(r).unwrap())
        .collect()
}

fn gated() -> (Arc<Gated>, Arc<Notify>, Arc<Notify>) {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let adapter = Arc::new(Gated {
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    });
    (adapter, started, release)
}

#[tokio::test]
async fn gateway_payload_creates_device_and_one_reading() {
    let app = Router::new().route(
        "/readings",
        get(|| async {
            Json(json!([{"externalId": "dev_001", "type": "temp", "value": 68.5, "unit": "F"}]))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/readings", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });

    let store = TestStore::memory();
    let orchestrator = orchestrator(&store, AdapterRegistry::with_defaults());
    let config = IntegrationConfig::new("Barn", "mqtt_gateway", IntegrationType::SensorHardware)
        .with_id("barn")
        .with_setting("endpoint", endpoint);
    orchestrator.repository().create(config).unwrap();

    let outcome = orchestrator.sync_integration("barn").await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced { .. }), "{outcome:?}");

    let devices = devices(&store);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].external_id, "dev_001");
    assert_eq!(devices[0].last_reading, Some(68.5));
    assert_eq!(devices[0].status, DeviceStatus::Online);

    let readings = store.get_all(SENSOR_READINGS).unwrap();
    assert_eq!(readings.len(), 1);
    let reading = SensorReading::from_record(&readings[0]).unwrap();
    assert_eq!(reading.value, 68.5);
    assert_eq!(reading.unit, "F");

    let config = orchestrator.repository().require("barn").unwrap();
    assert_eq!(config.status, IntegrationStatus::Active);
    assert_eq!(config.error_count, 0);
    assert!(config.last_sync_at.is_some());
}

#[tokio::test]
async fn repeated_syncs_reuse_the_device() {
    let store = TestStore::memory();
    let payload = json!([{"externalId": "dev_001", "type": "temp", "value": 70.0, "unit": "F"}]);
    let orchestrator = orchestrator(
        &store,
        AdapterRegistry::new().with(Scripted::sensors("static", payload)),
    );
    add(&orchestrator, "s1", "static");

    orchestrator.sync_integration("s1").await.unwrap();
    orchestrator.sync_integration("s1").await.unwrap();

    assert_eq!(devices(&store).len(), 1);
    assert_eq!(store.get_all(SENSOR_READINGS).unwrap().len(), 2);
}

#[tokio::test]
async fn failing_integration_does_not_affect_others() {
    let store = TestStore::memory();
    let payload = json!([{"externalId": "ok_1", "type": "rh", "value": 40.0}]);
    let registry = AdapterRegistry::new()
        .with(Scripted::failing("flaky"))
        .with(Scripted::sensors("static", payload))
        .with(Arc::new(Hanging));
    let orchestrator = orchestrator(&store, registry);
    add(&orchestrator, "a", "flaky");
    add(&orchestrator, "b", "static");
    add(&orchestrator, "c", "hanging");

    let runs = orchestrator.sync_all_active().await.unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.integration_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    assert_eq!(
        runs[0].outcome.as_ref().unwrap(),
        &SyncOutcome::Failed("provider returned HTTP 503".into())
    );
    assert!(matches!(runs[1].outcome.as_ref().unwrap(), SyncOutcome::Synced { .. }));
    assert_eq!(
        runs[2].outcome.as_ref().unwrap(),
        &SyncOutcome::Failed("fetch timed out".into())
    );

    let repo = orchestrator.repository();
    let a = repo.require("a").unwrap();
    assert_eq!(a.status, IntegrationStatus::Error);
    assert_eq!(a.error_count, 1);
    assert_eq!(a.last_error_message.as_deref(), Some("provider returned HTTP 503"));

    let b = repo.require("b").unwrap();
    assert_eq!(b.status, IntegrationStatus::Active);
    assert_eq!(b.error_count, 0);

    let c = repo.require("c").unwrap();
    assert_eq!(c.status, IntegrationStatus::Error);
    assert_eq!(c.error_count, 1);

    let failure = repo
        .logs_for("a")
        .unwrap()
        .into_iter()
        .find(|l| l.status == LogStatus::Failure)
        .unwrap();
    assert_eq!(failure.action, LogAction::Sync);
    assert!(failure.duration_ms.is_some());
}

#[tokio::test]
async fn panicking_adapter_is_recorded_as_failure() {
    let store = TestStore::memory();
    let orchestrator = orchestrator(&store, AdapterRegistry::new().with(Arc::new(Panicking)));
    add(&orchestrator, "p", "panicking");

    let outcome = orchestrator.sync_integration("p").await.unwrap();
    assert_eq!(outcome, SyncOutcome::Failed("adapter panicked".into()));
    assert_eq!(orchestrator.repository().require("p").unwrap().error_count, 1);
    assert!(!orchestrator.is_running("p"));
}

#[tokio::test]
async fn missing_adapter_marks_integration_error() {
    let store = TestStore::memory();
    let orchestrator = orchestrator(&store, AdapterRegistry::new());
    add(&orchestrator, "x", "acme");

    let outcome = orchestrator.sync_integration("x").await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed(_)));

    let config = orchestrator.repository().require("x").unwrap();
    assert_eq!(config.status, IntegrationStatus::Error);
    assert_eq!(config.error_count, 1);

    let logs = orchestrator.repository().logs_for("x").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, LogAction::Error);
    assert_eq!(logs[0].status, LogStatus::Failure);
}

#[tokio::test]
async fn inactive_integration_is_a_no_op() {
    let store = TestStore::memory();
    let orchestrator = orchestrator(
        &store,
        AdapterRegistry::new().with(Scripted::sensors("static", json!([]))),
    );
    let config = IntegrationConfig::new("Off", "static", IntegrationType::SensorHardware)
        .with_id("off")
        .with_status(IntegrationStatus::Inactive);
    orchestrator.repository().create(config).unwrap();

    assert_eq!(orchestrator.sync_integration("off").await.unwrap(), SyncOutcome::Inactive);
    assert!(orchestrator.repository().logs_for("off").unwrap().is_empty());
    assert!(orchestrator.sync_all_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_integration_is_an_error() {
    let store = TestStore::memory();
    let orchestrator = orchestrator(&store, AdapterRegistry::new());
    assert!(matches!(
        orchestrator.sync_integration("nope").await,
        Err(IntegrationError::NotFound(_))
    ));
}

#[tokio::test]
async fn success_clears_previous_errors() {
    let store = TestStore::memory();
    let adapter = Scripted::failing("toggle");
    let orchestrator = orchestrator(&store, AdapterRegistry::new().with(adapter.clone()));
    add(&orchestrator, "t", "toggle");

    orchestrator.sync_integration("t").await.unwrap();
    orchestrator.sync_integration("t").await.unwrap();
    let config = orchestrator.repository().require("t").unwrap();
    assert_eq!(config.status, IntegrationStatus::Error);
    assert_eq!(config.error_count, 2);

    adapter.failing.store(false, Ordering::SeqCst);
    orchestrator.sync_integration("t").await.unwrap();
    let config = orchestrator.repository().require("t").unwrap();
    assert_eq!(config.status, IntegrationStatus::Active);
    assert_eq!(config.error_count, 0);
    assert_eq!(config.last_error_message, None);
}

#[tokio::test]
async fn concurrent_call_for_same_integration_is_skipped() {
    let store = TestStore::memory();
    let (adapter, started, release) = gated();
    let orchestrator = orchestrator(&store, AdapterRegistry::new().with(adapter));
    add(&orchestrator, "g", "gated");

    let running = Arc::clone(&orchestrator);
    let first = tokio::spawn(async move { running.sync_integration("g").await });
    started.notified().await;

    assert!(orchestrator.is_running("g"));
    assert_eq!(
        orchestrator.sync_integration("g").await.unwrap(),
        SyncOutcome::AlreadyRunning
    );

    release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced { .. }));
    assert_eq!(store.get_all(SENSOR_READINGS).unwrap().len(), 1);
}

#[tokio::test]
async fn deactivation_during_fetch_discards_results() {
    let store = TestStore::memory();
    let (adapter, started, release) = gated();
    let orchestrator = orchestrator(&store, AdapterRegistry::new().with(adapter));
    add(&orchestrator, "g", "gated");

    let running = Arc::clone(&orchestrator);
    let first = tokio::spawn(async move { running.sync_integration("g").await });
    started.notified().await;
    orchestrator
        .repository()
        .set_status("g", IntegrationStatus::Inactive)
        .unwrap();
    release.notify_one();

    assert_eq!(first.await.unwrap().unwrap(), SyncOutcome::Discarded);
    assert!(devices(&store).is_empty());

    let config = orchestrator.repository().require("g").unwrap();
    assert_eq!(config.status, IntegrationStatus::Inactive);
    assert_eq!(config.last_sync_at, None);
    assert!(orchestrator
        .repository()
        .logs_for("g")
        .unwrap()
        .iter()
        .any(|l| l.details.contains("discarded")));
}

/// Routes loopback requests into an in-process replica.
struct Replica(Arc<SyncServer>);

impl LoopbackServer for Replica {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

fn sync_engine(
    server: &Arc<SyncServer>,
    name: &str,
    handle: StoreHandle,
) -> SyncEngine<HttpTransport<LoopbackClient<Replica>>> {
    let config = SyncConfig::new(name, "alice", "loopback://replica");
    let transport = HttpTransport::new(
        config.server_url.clone(),
        LoopbackClient::new(Replica(Arc::clone(server))),
    );
    SyncEngine::new(config, Arc::new(transport), handle)
}

#[tokio::test]
async fn integration_results_stay_on_the_device() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let payload = json!([{"externalId": "dev_001", "type": "temp", "value": 68.5, "unit": "F"}]);

    let mut engines = Vec::new();
    for name in ["device-a", "device-b"] {
        let store = TestStore::memory();
        let orchestrator = orchestrator(
            &store,
            AdapterRegistry::new().with(Scripted::sensors("static", payload.clone())),
        );
        add(&orchestrator, "barn", "static");
        let outcome = orchestrator.sync_integration("barn").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Synced { .. }), "{outcome:?}");
        assert!(store.get_all(SYNC_QUEUE).unwrap().is_empty());

        engines.push((sync_engine(&server, name, store.handle.clone()), store));
    }

    for (engine, _) in &engines {
        let report = engine.run_sync_cycle().await.unwrap();
        assert!(report.success);
        assert_eq!(report.pushed, 0);
        assert_eq!(report.conflicts, 0);
    }
    assert_eq!(server.row_count(), 0);

    for (engine, store) in &engines {
        assert!(engine.conflicts().list_unresolved().unwrap().is_empty());
        assert_eq!(devices(store).len(), 1);
    }
}
