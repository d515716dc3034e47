//! Built-in HTTP adapters.

mod mqtt_gateway;
mod openai;
mod weather_api;

pub use mqtt_gateway::MqttGatewayAdapter;
pub use openai::OpenAiAdapter;
pub use weather_api::WeatherApiAdapter;

use crate::error::AdapterError;
use crate::model::IntegrationConfig;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn required<'a>(config: &'a IntegrationConfig, key: &str) -> Result<&'a str, AdapterError> {
    config
        .setting(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AdapterError::missing_setting(key))
}

/// Sends `request` and decodes a JSON body, mapping non-2xx to [`AdapterError::Status`].
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AdapterError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AdapterError::Status(status.as_u16()));
    }
    resp.json::<T>()
        .await
        .map_err(|e| AdapterError::Parse(e.to_string()))
}
