//! Runs one integration sync end to end.
//!
//! A sync resolves the adapter, fetches under a timeout, re-checks that the
//! integration is still enabled, materializes the payload and records the
//! outcome on the config and in the log. Each call is independent: a failing
//! or hanging adapter only ever marks its own integration.

use crate::adapter::{AdapterRegistry, IntegrationAdapter};
use crate::config::OrchestratorConfig;
use crate::error::{AdapterError, IntegrationError, IntegrationResult};
use crate::logs::IntegrationLogStore;
use crate::materialize::{materialize, MaterializeReport};
use crate::model::{IntegrationConfig, IntegrationStatus, LogAction, LogStatus};
use crate::repository::IntegrationRepository;
use homestead_store::StoreHandle;
use homestead_sync_protocol::now_millis;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How a [`IntegrationOrchestrator::sync_integration`] call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Data fetched and materialized.
    Synced {
        /// What the materializer wrote.
        report: MaterializeReport,
        /// Fetch duration.
        duration_ms: u64,
    },
    /// The integration is inactive; nothing happened.
    Inactive,
    /// Another call for the same integration is running; nothing happened.
    AlreadyRunning,
    /// The integration was switched off during the fetch; results dropped.
    Discarded,
    /// The sync failed; the integration is marked `error`.
    Failed(String),
}

/// One entry of [`IntegrationOrchestrator::sync_all_active`].
#[derive(Debug)]
pub struct IntegrationRun {
    /// Integration id.
    pub integration_id: String,
    /// Outcome, or the error that prevented recording one.
    pub outcome: IntegrationResult<SyncOutcome>,
}

/// Removes its id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        if set.lock().insert(id.to_string()) {
            Some(Self {
                set,
                id: id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Drives adapters and records their outcomes.
pub struct IntegrationOrchestrator {
    registry: AdapterRegistry,
    repository: IntegrationRepository,
    logs: IntegrationLogStore,
    handle: StoreHandle,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl IntegrationOrchestrator {
    /// Creates an orchestrator writing through `handle`.
    ///
    /// Nothing it writes is queued for upload.
    pub fn new(handle: StoreHandle, registry: AdapterRegistry, config: OrchestratorConfig) -> Self {
        let repository = IntegrationRepository::new(handle.clone());
        let logs = repository.logs().clone();
        Self {
            registry,
            repository,
            logs,
            handle,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the adapter registry.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Returns the integration repository.
    pub fn repository(&self) -> &IntegrationRepository {
        &self.repository
    }

    /// Returns the log store.
    pub fn logs(&self) -> &IntegrationLogStore {
        &self.logs
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns true if a sync for `id` is running.
    pub fn is_running(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Syncs one integration.
    ///
    /// Adapter failures, timeouts and panics are recorded on the integration
    /// and reported as [`SyncOutcome::Failed`]; `Err` is reserved for an
    /// unknown id and local store failures.
    pub async fn sync_integration(&self, id: &str) -> IntegrationResult<SyncOutcome> {
        let Some(_guard) = InFlight::acquire(&self.in_flight, id) else {
            debug!(integration = id, "sync already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let config = self.repository.require(id)?;
        if !config.is_enabled() {
            debug!(integration = id, "integration inactive");
            return Ok(SyncOutcome::Inactive);
        }

        let Some(adapter) = self.registry.get(&config.provider) else {
            let message = IntegrationError::AdapterMissing(config.provider.clone()).to_string();
            warn!(integration = id, provider = %config.provider, "no adapter registered");
            self.logs
                .record(id, LogAction::Error, LogStatus::Failure, message.clone(), None)?;
            self.mark_failed(id, &message)?;
            return Ok(SyncOutcome::Failed(message));
        };

        self.logs
            .record(id, LogAction::Sync, LogStatus::Success, "Starting sync...", None)?;
        info!(integration = id, provider = %config.provider, "integration sync started");

        let started = Instant::now();
        let fetched = self.fetch(adapter, config).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match fetched {
            Ok(payload) => self.complete(id, payload, duration_ms),
            Err(message) => self.fail(id, message, duration_ms),
        }
    }

    /// Syncs every integration that is not inactive, each in its own task.
    ///
    /// Results are ordered by integration id.
    pub async fn sync_all_active(self: &Arc<Self>) -> IntegrationResult<Vec<IntegrationRun>> {
        let mut tasks = JoinSet::new();
        for config in self.repository.list()?.into_iter().filter(IntegrationConfig::is_enabled) {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.sync_integration(&config.id).await;
                IntegrationRun {
                    integration_id: config.id,
                    outcome,
                }
            });
        }

        let mut runs = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => warn!(error = %e, "integration task ended abnormally"),
            }
        }
        runs.sort_by(|a, b| a.integration_id.cmp(&b.integration_id));
        Ok(runs)
    }

    /// Runs fetch and transform on their own task under the fetch timeout.
    ///
    /// The task is aborted on timeout; a panic is reported like any failure.
    async fn fetch(
        &self,
        adapter: Arc<dyn IntegrationAdapter>,
        config: IntegrationConfig,
    ) -> Result<Value, String> {
        let mut task = tokio::spawn(async move {
            adapter
                .fetch(&config)
                .await
                .and_then(|raw| adapter.transform(raw))
        });
        match tokio::time::timeout(self.config.fetch_timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(|e| e.to_string()),
            Ok(Err(e)) if e.is_panic() => Err("adapter panicked".to_string()),
            Ok(Err(e)) => Err(format!("adapter task failed: {e}")),
            Err(_) => {
                task.abort();
                Err(AdapterError::Timeout.to_string())
            }
        }
    }

    fn complete(
        &self,
        id: &str,
        payload: Value,
        duration_ms: u64,
    ) -> IntegrationResult<SyncOutcome> {
        let current = self.repository.require(id)?;
        if !current.is_enabled() {
            info!(integration = id, "integration deactivated during sync; results discarded");
            self.logs.record(
                id,
                LogAction::Sync,
                LogStatus::Success,
                "Results discarded: integration is inactive",
                Some(duration_ms),
            )?;
            return Ok(SyncOutcome::Discarded);
        }

        let report = match materialize(&self.handle, &current, payload) {
            Ok(report) => report,
            Err(IntegrationError::Invalid(message)) => return self.fail(id, message, duration_ms),
            Err(e) => return Err(e),
        };

        let now = now_millis();
        self.repository.modify(id, |config| {
            if !config.is_enabled() {
                return false;
            }
            config.status = IntegrationStatus::Active;
            config.last_sync_at = Some(now);
            config.error_count = 0;
            config.last_error_message = None;
            true
        })?;
        self.logs.record(
            id,
            LogAction::Sync,
            LogStatus::Success,
            format!("Sync completed in {duration_ms}ms"),
            Some(duration_ms),
        )?;
        info!(
            integration = id,
            duration_ms,
            devices = report.devices_created + report.devices_updated,
            readings = report.readings,
            "integration sync completed"
        );
        Ok(SyncOutcome::Synced { report, duration_ms })
    }

    fn fail(&self, id: &str, message: String, duration_ms: u64) -> IntegrationResult<SyncOutcome> {
        warn!(integration = id, duration_ms, error = %message, "integration sync failed");
        self.mark_failed(id, &message)?;
        self.logs.record(
            id,
            LogAction::Sync,
            LogStatus::Failure,
            message.clone(),
            Some(duration_ms),
        )?;
        Ok(SyncOutcome::Failed(message))
    }

    fn mark_failed(&self, id: &str, message: &str) -> IntegrationResult<()> {
        self.repository.modify(id, |config| {
            if config.is_enabled() {
                config.status = IntegrationStatus::Error;
            }
            config.error_count = config.error_count.saturating_add(1);
            config.last_error_message = Some(message.to_string());
            true
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for IntegrationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationOrchestrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
