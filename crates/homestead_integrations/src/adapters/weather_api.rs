//! Current-conditions weather provider (OpenWeather-compatible API).

use super::{http_client, required, send_json};
use crate::adapter::IntegrationAdapter;
use crate::error::AdapterError;
use crate::materialize::WeatherSample;
use crate::model::{IntegrationConfig, IntegrationType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const PROVIDER_ID: &str = "weather_api";
const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const DEFAULT_UNITS: &str = "metric";

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    main: Option<MainBlock>,
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    wind: Option<Wind>,
    /// Observation time in Unix seconds.
    dt: i64,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: Option<f64>,
}

/// Adapter for `weather_api` integrations.
///
/// Settings: `apiKey` and `location` (required), `units` (default
/// `metric`), `baseUrl` (default the public API).
pub struct WeatherApiAdapter {
    client: Client,
}

impl WeatherApiAdapter {
    /// Creates the adapter with its own HTTP client.
    pub fn new() -> Self {
        Self { client: http_client() }
    }
}

impl Default for WeatherApiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntegrationAdapter for WeatherApiAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Weather API"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::Weather
    }

    async fn fetch(&self, config: &IntegrationConfig) -> Result<Value, AdapterError> {
        let api_key = required(config, "apiKey")?;
        let location = required(config, "location")?;
        let base = config.setting("baseUrl").unwrap_or(DEFAULT_BASE_URL);
        let units = config.setting("units").unwrap_or(DEFAULT_UNITS);

        let request = self
            .client
            .get(format!("{}/weather", base.trim_end_matches('/')))
            .query(&[("q", location), ("appid", api_key), ("units", units)]);
        let mut raw: Value = send_json(request).await?;
        // Keep the configured location when the provider omits a name.
        if raw.get("name").map_or(true, Value::is_null) {
            if let Some(obj) = raw.as_object_mut() {
                obj.insert("name".into(), Value::from(location));
            }
        }
        Ok(raw)
    }

    fn transform(&self, raw: Value) -> Result<Value, AdapterError> {
        let current: CurrentWeather =
            serde_json::from_value(raw).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let sample = WeatherSample {
            location: current.name.unwrap_or_default(),
            temperature: current.main.as_ref().and_then(|m| m.temp),
            humidity: current.main.as_ref().and_then(|m| m.humidity),
            conditions: current.weather.into_iter().next().map(|c| c.description),
            wind_speed: current.wind.and_then(|w| w.speed),
            observed_at: current.dt.saturating_mul(1000),
        };
        serde_json::to_value(sample).map_err(|e| AdapterError::Parse(e.to_string()))
    }
}
