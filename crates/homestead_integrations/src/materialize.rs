//! Materializers: turn normalized adapter payloads into local records.
//!
//! Derived rows are written straight through the [`StoreHandle`] and never
//! enter the outbox.

use crate::error::{IntegrationError, IntegrationResult};
use crate::model::{
    DeviceStatus, IntegrationConfig, IntegrationType, SensorDevice, SensorReading,
    WeatherObservation, SENSOR_DEVICES, SENSOR_READINGS, WEATHER_OBSERVATIONS,
};
use homestead_store::StoreHandle;
use homestead_sync_protocol::{now_millis, Record, SyncStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// One normalized sensor measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    /// Gateway device id.
    pub external_id: String,
    /// Measured quantity.
    #[serde(rename = "type")]
    pub kind: String,
    /// Measured value.
    pub value: f64,
    /// Unit of `value`.
    #[serde(default)]
    pub unit: String,
    /// Device display name, if the gateway reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Measurement time, if the gateway reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<i64>,
}

/// One normalized weather report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSample {
    /// Location the report is for.
    pub location: String,
    /// Temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Short condition text.
    #[serde(default)]
    pub conditions: Option<String>,
    /// Wind speed.
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Observation time (Unix millis).
    pub observed_at: i64,
}

/// What a materializer wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Devices seen for the first time.
    pub devices_created: usize,
    /// Devices already known.
    pub devices_updated: usize,
    /// Readings appended.
    pub readings: usize,
    /// Weather observations written.
    pub observations: usize,
}

/// Routes a normalized payload to the materializer for the integration's type.
///
/// AI engine and generic payloads are health checks and write nothing.
pub fn materialize(
    handle: &StoreHandle,
    config: &IntegrationConfig,
    payload: Value,
) -> IntegrationResult<MaterializeReport> {
    match config.kind {
        IntegrationType::SensorHardware => {
            let samples: Vec<SensorSample> = serde_json::from_value(payload)
                .map_err(|e| IntegrationError::Invalid(format!("sensor payload: {e}")))?;
            materialize_sensors(handle, config, &samples)
        }
        IntegrationType::Weather => {
            let sample: WeatherSample = serde_json::from_value(payload)
                .map_err(|e| IntegrationError::Invalid(format!("weather payload: {e}")))?;
            materialize_weather(handle, config, &sample)
        }
        IntegrationType::AiEngine | IntegrationType::Generic => Ok(MaterializeReport::default()),
    }
}

/// Upserts one device per `externalId` and appends one reading per sample.
pub fn materialize_sensors(
    handle: &StoreHandle,
    config: &IntegrationConfig,
    samples: &[SensorSample],
) -> IntegrationResult<MaterializeReport> {
    if samples.iter().any(|s| s.external_id.is_empty()) {
        return Err(IntegrationError::Invalid("sensor sample without externalId".into()));
    }
    let mut report = MaterializeReport::default();
    for sample in samples {
        let now = now_millis();
        let recorded_at = sample.recorded_at.unwrap_or(now);
        let device = upsert_device(handle, config, sample, recorded_at, now, &mut report)?;

        let reading = SensorReading {
            id: Uuid::new_v4().to_string(),
            device_id: device.id.clone(),
            external_id: sample.external_id.clone(),
            kind: sample.kind.clone(),
            value: sample.value,
            unit: sample.unit.clone(),
            recorded_at,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
        };
        handle.put_if_newer(SENSOR_READINGS, reading.to_record()?)?;
        report.readings += 1;
    }
    debug!(
        integration = %config.id,
        created = report.devices_created,
        updated = report.devices_updated,
        readings = report.readings,
        "materialized sensor payload"
    );
    Ok(report)
}

/// Finds the device by `externalId` and writes its latest reading.
///
/// Runs under a lock on the external id, so two integrations reporting the
/// same device never create it twice.
fn upsert_device(
    handle: &StoreHandle,
    config: &IntegrationConfig,
    sample: &SensorSample,
    recorded_at: i64,
    now: i64,
    report: &mut MaterializeReport,
) -> IntegrationResult<SensorDevice> {
    let lock_key = format!("ext:{}", sample.external_id);
    handle.with_lock(SENSOR_DEVICES, &lock_key, || -> IntegrationResult<SensorDevice> {
        let external_id = Value::from(sample.external_id.clone());
        let existing = handle
            .get_all_by_index(SENSOR_DEVICES, "externalId", &external_id)?
            .into_iter()
            .max_by_key(|r| r.updated_at);

        let device = match existing {
            Some(record) => {
                let mut device = SensorDevice::from_record(&record)?;
                device.status = DeviceStatus::Online;
                device.last_reading = Some(sample.value);
                device.last_reading_at = Some(recorded_at);
                device.updated_at = now.max(device.updated_at);
                if let Some(name) = &sample.name {
                    device.name = name.clone();
                }
                report.devices_updated += 1;
                device
            }
            None => {
                report.devices_created += 1;
                SensorDevice {
                    id: Uuid::new_v4().to_string(),
                    external_id: sample.external_id.clone(),
                    integration_id: config.id.clone(),
                    name: sample.name.clone().unwrap_or_else(|| sample.external_id.clone()),
                    kind: sample.kind.clone(),
                    unit: sample.unit.clone(),
                    status: DeviceStatus::Online,
                    last_reading: Some(sample.value),
                    last_reading_at: Some(recorded_at),
                    created_at: now,
                    updated_at: now,
                    sync_status: SyncStatus::Synced,
                }
            }
        };
        handle.put_if_newer(SENSOR_DEVICES, device.to_record()?)?;
        Ok(device)
    })
}

/// Replaces the integration's weather observation.
pub fn materialize_weather(
    handle: &StoreHandle,
    config: &IntegrationConfig,
    sample: &WeatherSample,
) -> IntegrationResult<MaterializeReport> {
    handle.update(WEATHER_OBSERVATIONS, &config.id, |current| {
        let now = now_millis();
        let (created_at, previous) = current.map_or((now, now), |r| (r.created_at, r.updated_at));
        let observation = WeatherObservation {
            id: config.id.clone(),
            location: sample.location.clone(),
            temperature: sample.temperature,
            humidity: sample.humidity,
            conditions: sample.conditions.clone(),
            wind_speed: sample.wind_speed,
            observed_at: sample.observed_at,
            created_at,
            updated_at: now.max(previous),
            sync_status: SyncStatus::Synced,
        };
        Ok(Some(Record::from_entity(&observation)?))
    })?;
    debug!(integration = %config.id, location = %sample.location, "materialized weather payload");
    Ok(MaterializeReport {
        observations: 1,
        ..MaterializeReport::default()
    })
}
