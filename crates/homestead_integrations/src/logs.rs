//! Append-only integration history.

use crate::error::IntegrationResult;
use crate::model::{IntegrationLog, LogAction, LogStatus, INTEGRATION_LOGS};
use homestead_store::StoreHandle;
use serde_json::Value;

/// Writes and reads [`IntegrationLog`] entries.
#[derive(Debug, Clone)]
pub struct IntegrationLogStore {
    handle: StoreHandle,
}

impl IntegrationLogStore {
    /// Creates a log store over `handle`.
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Appends `entry`.
    pub fn append(&self, entry: IntegrationLog) -> IntegrationResult<IntegrationLog> {
        self.handle.put_if_newer(INTEGRATION_LOGS, entry.to_record()?)?;
        Ok(entry)
    }

    /// Appends an entry built from its parts.
    pub fn record(
        &self,
        integration_id: &str,
        action: LogAction,
        status: LogStatus,
        details: impl Into<String>,
        duration_ms: Option<u64>,
    ) -> IntegrationResult<IntegrationLog> {
        self.append(IntegrationLog::new(integration_id, action, status, details, duration_ms))
    }

    /// Returns the entries of one integration, newest first.
    pub fn for_integration(&self, integration_id: &str) -> IntegrationResult<Vec<IntegrationLog>> {
        let mut entries = self
            .handle
            .get_all_by_index(INTEGRATION_LOGS, "integrationId", &Value::from(integration_id))?
            .iter()
            .map(IntegrationLog::from_record)
            .collect::<IntegrationResult<Vec<_>>>()?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }
}
