//! HTTP bridge in front of an MQTT broker.
//!
//! The gateway exposes the latest retained reading of every sensor as JSON,
//! either as a bare array or wrapped in `{"readings": [...]}`.

use super::{http_client, required, send_json};
use crate::adapter::IntegrationAdapter;
use crate::error::AdapterError;
use crate::materialize::SensorSample;
use crate::model::{IntegrationConfig, IntegrationType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const PROVIDER_ID: &str = "mqtt_gateway";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayReading {
    #[serde(alias = "external_id", alias = "deviceId")]
    external_id: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    value: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "recordedAt")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GatewayPayload {
    List(Vec<GatewayReading>),
    Wrapped { readings: Vec<GatewayReading> },
}

/// Adapter for `mqtt_gateway` integrations.
///
/// Settings: `endpoint` (required), `apiKey` (optional bearer token).
pub struct MqttGatewayAdapter {
    client: Client,
}

impl MqttGatewayAdapter {
    /// Creates the adapter with its own HTTP client.
    pub fn new() -> Self {
        Self { client: http_client() }
    }
}

impl Default for MqttGatewayAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntegrationAdapter for MqttGatewayAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "MQTT Gateway"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::SensorHardware
    }

    async fn fetch(&self, config: &IntegrationConfig) -> Result<Value, AdapterError> {
        let endpoint = required(config, "endpoint")?;
        let mut request = self.client.get(endpoint);
        if let Some(key) = config.setting("apiKey") {
            request = request.bearer_auth(key);
        }
        send_json(request).await
    }

    fn transform(&self, raw: Value) -> Result<Value, AdapterError> {
        let payload: GatewayPayload =
            serde_json::from_value(raw).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let readings = match payload {
            GatewayPayload::List(readings) | GatewayPayload::Wrapped { readings } => readings,
        };
        let samples: Vec<SensorSample> = readings
            .into_iter()
            .map(|r| SensorSample {
                external_id: r.external_id,
                kind: r.kind.unwrap_or_else(|| "unknown".to_string()),
                value: r.value,
                unit: r.unit.unwrap_or_default(),
                name: r.name,
                recorded_at: r.timestamp,
            })
            .collect();
        serde_json::to_value(samples).map_err(|e| AdapterError::Parse(e.to_string()))
    }
}
