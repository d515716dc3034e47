//! # Homestead Integrations
//!
//! Third-party data sources feeding the local store.
//!
//! This crate provides:
//! - The [`IntegrationAdapter`] contract and the [`AdapterRegistry`]
//! - Built-in HTTP adapters: `mqtt_gateway`, `weather_api`, `openai`
//! - Materializers turning normalized payloads into sensor and weather rows
//! - The [`IntegrationOrchestrator`] with per-call fault isolation
//! - An append-only integration log and an admin repository
//! - Per-integration interval schedules
//!
//! Integration data is device-local. Configs, logs and derived rows are
//! written straight through the [`StoreHandle`](homestead_store::StoreHandle)
//! and never touch the sync engine's outbox, so running an integration can
//! neither queue uploads nor raise sync conflicts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use homestead_integrations::{AdapterRegistry, IntegrationOrchestrator, OrchestratorConfig};
//!
//! let orchestrator = IntegrationOrchestrator::new(
//!     handle,
//!     AdapterRegistry::with_defaults(),
//!     OrchestratorConfig::default(),
//! );
//! let outcome = orchestrator.sync_integration("barn-gateway").await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod adapters;
mod config;
mod error;
mod logs;
mod materialize;
mod model;
mod orchestrator;
mod repository;
mod schedule;

pub use adapter::{AdapterRegistry, IntegrationAdapter};
pub use adapters::{MqttGatewayAdapter, OpenAiAdapter, WeatherApiAdapter};
pub use config::{OrchestratorConfig, ScheduleConfig};
pub use error::{AdapterError, IntegrationError, IntegrationResult};
pub use logs::IntegrationLogStore;
pub use materialize::{
    materialize, materialize_sensors, materialize_weather, MaterializeReport, SensorSample,
    WeatherSample,
};
pub use model::{
    DeviceStatus, IntegrationConfig, IntegrationLog, IntegrationStatus, IntegrationType,
    LogAction, LogStatus, SensorDevice, SensorReading, WeatherObservation, INTEGRATIONS,
    INTEGRATION_LOGS, SENSOR_DEVICES, SENSOR_READINGS, WEATHER_OBSERVATIONS,
};
pub use orchestrator::{IntegrationOrchestrator, IntegrationRun, SyncOutcome};
pub use repository::IntegrationRepository;
pub use schedule::{due_integrations, interval_for, IntegrationScheduler, INTERVAL_SETTING};
