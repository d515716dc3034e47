//! Integration entities and the records derived from adapter payloads.
//!
//! Every entity carries the four sync fields (`id`, `createdAt`,
//! `updatedAt`, `syncStatus`) so it converts losslessly to a [`Record`].
//! Integration rows are device-local: they are written straight to the
//! store as `synced` and never enter the outbox.

use crate::error::IntegrationResult;
use homestead_sync_protocol::{now_millis, Record, SyncStatus, Syncable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Collection holding [`IntegrationConfig`] rows.
pub const INTEGRATIONS: &str = "integrations";
/// Collection holding [`IntegrationLog`] rows.
pub const INTEGRATION_LOGS: &str = "integration_logs";
/// Collection holding [`SensorDevice`] rows.
pub const SENSOR_DEVICES: &str = "sensor_devices";
/// Collection holding [`SensorReading`] rows.
pub const SENSOR_READINGS: &str = "sensor_readings";
/// Collection holding [`WeatherObservation`] rows.
pub const WEATHER_OBSERVATIONS: &str = "weather_observations";

/// Which materializer an integration's data is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    /// Sensor gateways producing devices and readings.
    SensorHardware,
    /// Weather providers.
    Weather,
    /// AI engines; fetched for health only.
    AiEngine,
    /// Anything else; fetched for health only.
    Generic,
}

impl IntegrationType {
    /// Returns the wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::SensorHardware => "sensor_hardware",
            IntegrationType::Weather => "weather",
            IntegrationType::AiEngine => "ai_engine",
            IntegrationType::Generic => "generic",
        }
    }
}

impl std::str::FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor_hardware" => Ok(IntegrationType::SensorHardware),
            "weather" => Ok(IntegrationType::Weather),
            "ai_engine" => Ok(IntegrationType::AiEngine),
            "generic" => Ok(IntegrationType::Generic),
            other => Err(format!("unknown integration type: {other}")),
        }
    }
}

/// Lifecycle state of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    /// Synced by the orchestrator.
    Active,
    /// Switched off by an operator; never synced.
    Inactive,
    /// The last sync failed. Still synced, so it can recover.
    Error,
}

impl IntegrationStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Inactive => "inactive",
            IntegrationStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for IntegrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IntegrationStatus::Active),
            "inactive" => Ok(IntegrationStatus::Inactive),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(format!("unknown integration status: {other}")),
        }
    }
}

/// What a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    /// A sync attempt or one of its phases.
    Sync,
    /// A failure outside a fetch, e.g. a missing adapter.
    Error,
}

/// Outcome recorded in a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// The step succeeded.
    Success,
    /// The step failed.
    Failure,
}

/// Connectivity of a sensor device as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Reported a reading in the latest sync.
    Online,
    /// Not heard from.
    Offline,
}

macro_rules! impl_syncable {
    ($($entity:ty),+ $(,)?) => {
        $(
            impl Syncable for $entity {
                fn id(&self) -> &str {
                    &self.id
                }

                fn updated_at(&self) -> i64 {
                    self.updated_at
                }

                fn sync_status(&self) -> SyncStatus {
                    self.sync_status
                }
            }

            impl $entity {
                /// Converts the entity into a record.
                pub fn to_record(&self) -> IntegrationResult<Record> {
                    Ok(Record::from_entity(self)?)
                }

                /// Reads the entity back from a record.
                pub fn from_record(record: &Record) -> IntegrationResult<Self> {
                    Ok(record.to_entity()?)
                }
            }
        )+
    };
}

/// A configured third-party integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    /// Integration identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider id the adapter registry is keyed by.
    pub provider: String,
    /// Materializer routing.
    #[serde(rename = "type")]
    pub kind: IntegrationType,
    /// Current lifecycle state.
    pub status: IntegrationStatus,
    /// Opaque provider settings such as `apiKey` or `endpoint`.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// When the last successful sync finished.
    #[serde(default)]
    pub last_sync_at: Option<i64>,
    /// Consecutive failed syncs.
    #[serde(default)]
    pub error_count: u32,
    /// Message of the last failure.
    #[serde(default)]
    pub last_error_message: Option<String>,
    /// Creation time.
    pub created_at: i64,
    /// Last modification time.
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

impl IntegrationConfig {
    /// Creates an active integration with a fresh id.
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        kind: IntegrationType,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            provider: provider.into(),
            kind,
            status: IntegrationStatus::Active,
            settings: BTreeMap::new(),
            last_sync_at: None,
            error_count: 0,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
        }
    }

    /// Replaces the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: IntegrationStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns a setting.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Returns true unless an operator switched the integration off.
    pub fn is_enabled(&self) -> bool {
        self.status != IntegrationStatus::Inactive
    }
}

/// One append-only entry in an integration's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationLog {
    /// Log entry identifier.
    pub id: String,
    /// Integration the entry belongs to.
    pub integration_id: String,
    /// What happened.
    pub action: LogAction,
    /// How it ended.
    pub status: LogStatus,
    /// Human-readable details.
    pub details: String,
    /// Elapsed time of the step, if measured.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Creation time.
    pub created_at: i64,
    /// Equal to `created_at`; entries never change.
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

impl IntegrationLog {
    /// Creates an entry stamped now.
    pub fn new(
        integration_id: impl Into<String>,
        action: LogAction,
        status: LogStatus,
        details: impl Into<String>,
        duration_ms: Option<u64>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            integration_id: integration_id.into(),
            action,
            status,
            details: details.into(),
            duration_ms,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
        }
    }
}

/// A physical sensor discovered through a gateway integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDevice {
    /// Local identifier.
    pub id: String,
    /// Identifier assigned by the gateway; unique per device.
    pub external_id: String,
    /// Integration that reported the device.
    pub integration_id: String,
    /// Display name.
    pub name: String,
    /// Measured quantity, e.g. `temp`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Unit of the readings.
    pub unit: String,
    /// Connectivity.
    pub status: DeviceStatus,
    /// Latest reported value.
    #[serde(default)]
    pub last_reading: Option<f64>,
    /// When the latest value was recorded.
    #[serde(default)]
    pub last_reading_at: Option<i64>,
    /// Creation time.
    pub created_at: i64,
    /// Last modification time.
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

/// One measurement appended per device and sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Reading identifier.
    pub id: String,
    /// Local device id.
    pub device_id: String,
    /// Gateway device id.
    pub external_id: String,
    /// Measured quantity.
    #[serde(rename = "type")]
    pub kind: String,
    /// Measured value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: String,
    /// Measurement time.
    pub recorded_at: i64,
    /// Creation time.
    pub created_at: i64,
    /// Equal to `created_at`.
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

/// The latest normalized weather payload for one integration.
///
/// Keyed by the integration id, so each sync replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherObservation {
    /// Integration id.
    pub id: String,
    /// Location as configured or reported.
    pub location: String,
    /// Temperature in the provider's units.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Short condition text.
    #[serde(default)]
    pub conditions: Option<String>,
    /// Wind speed in the provider's units.
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Provider observation time.
    pub observed_at: i64,
    /// Creation time.
    pub created_at: i64,
    /// Last modification time.
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

impl_syncable!(
    IntegrationConfig,
    IntegrationLog,
    SensorDevice,
    SensorReading,
    WeatherObservation,
);
