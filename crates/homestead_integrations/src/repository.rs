//! Admin surface over `integrations`.

use crate::error::{IntegrationError, IntegrationResult};
use crate::logs::IntegrationLogStore;
use crate::model::{IntegrationConfig, IntegrationLog, IntegrationStatus, INTEGRATIONS};
use homestead_store::StoreHandle;
use homestead_sync_protocol::{now_millis, Record, SyncStatus};
use std::collections::BTreeMap;
use tracing::info;

/// Creates, reads and edits integration configs.
///
/// Every mutation is a read-modify-write under the record's key lock.
/// Configs are device-local and never queued for upload.
#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    handle: StoreHandle,
    logs: IntegrationLogStore,
}

impl IntegrationRepository {
    /// Creates a repository over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        let logs = IntegrationLogStore::new(handle.clone());
        Self { handle, logs }
    }

    /// Stores a new integration.
    pub fn create(&self, mut config: IntegrationConfig) -> IntegrationResult<IntegrationConfig> {
        if config.name.trim().is_empty() {
            return Err(IntegrationError::Invalid("name must not be empty".into()));
        }
        if config.provider.trim().is_empty() {
            return Err(IntegrationError::Invalid("provider must not be empty".into()));
        }
        config.sync_status = SyncStatus::Synced;
        let record = config.to_record()?;
        let created = self
            .handle
            .with_lock(INTEGRATIONS, &config.id, || -> IntegrationResult<bool> {
                if self.handle.get(INTEGRATIONS, &config.id)?.is_some() {
                    return Ok(false);
                }
                Ok(self.handle.put_if_newer_locked(INTEGRATIONS, record)?)
            })?;
        if !created {
            return Err(IntegrationError::Invalid(format!(
                "integration {} already exists",
                config.id
            )));
        }
        info!(integration = %config.id, provider = %config.provider, "integration created");
        Ok(config)
    }

    /// Returns the integration with `id`.
    pub fn get(&self, id: &str) -> IntegrationResult<Option<IntegrationConfig>> {
        self.handle
            .get(INTEGRATIONS, id)?
            .map(|r| IntegrationConfig::from_record(&r))
            .transpose()
    }

    /// Returns the integration with `id` or [`IntegrationError::NotFound`].
    pub fn require(&self, id: &str) -> IntegrationResult<IntegrationConfig> {
        self.get(id)?
            .ok_or_else(|| IntegrationError::NotFound(id.to_string()))
    }

    /// Returns every integration ordered by name.
    pub fn list(&self) -> IntegrationResult<Vec<IntegrationConfig>> {
        let mut configs = self
            .handle
            .get_all(INTEGRATIONS)?
            .iter()
            .map(IntegrationConfig::from_record)
            .collect::<IntegrationResult<Vec<_>>>()?;
        configs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(configs)
    }

    /// Replaces the settings, and the name when given.
    pub fn update_settings(
        &self,
        id: &str,
        name: Option<String>,
        settings: BTreeMap<String, String>,
    ) -> IntegrationResult<IntegrationConfig> {
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(IntegrationError::Invalid("name must not be empty".into()));
        }
        self.modify(id, |config| {
            if let Some(name) = name {
                config.name = name;
            }
            config.settings = settings;
            true
        })
    }

    /// Switches an integration on or off.
    ///
    /// `error` is owned by the orchestrator and cannot be set here.
    pub fn set_status(
        &self,
        id: &str,
        status: IntegrationStatus,
    ) -> IntegrationResult<IntegrationConfig> {
        if status == IntegrationStatus::Error {
            return Err(IntegrationError::Invalid(
                "status can only be set to active or inactive".into(),
            ));
        }
        let config = self.modify(id, |config| {
            config.status = status;
            true
        })?;
        info!(integration = id, status = status.as_str(), "integration status changed");
        Ok(config)
    }

    /// Returns the history of one integration, newest first.
    pub fn logs_for(&self, id: &str) -> IntegrationResult<Vec<IntegrationLog>> {
        self.logs.for_integration(id)
    }

    /// Returns the log store.
    pub fn logs(&self) -> &IntegrationLogStore {
        &self.logs
    }

    /// Applies `f` to the stored config under its key lock.
    ///
    /// `f` returns whether to write. The write is stamped no earlier than
    /// the stored version.
    pub(crate) fn modify<F>(&self, id: &str, f: F) -> IntegrationResult<IntegrationConfig>
    where
        F: FnOnce(&mut IntegrationConfig) -> bool,
    {
        let mut snapshot = None;
        self.handle.update(INTEGRATIONS, id, |current| {
            let Some(record) = current else {
                return Ok(None);
            };
            let mut config: IntegrationConfig = record.to_entity()?;
            if !f(&mut config) {
                snapshot = Some(config);
                return Ok(None);
            }
            config.updated_at = now_millis().max(record.updated_at);
            config.sync_status = SyncStatus::Synced;
            let next = Record::from_entity(&config)?;
            snapshot = Some(config);
            Ok(Some(next))
        })?;

        snapshot.ok_or_else(|| IntegrationError::NotFound(id.to_string()))
    }
}
