//! AI engine health check.
//!
//! Lists the models visible to the configured key; a success means the
//! engine is reachable and the key is valid.

use super::{http_client, required, send_json};
use crate::adapter::IntegrationAdapter;
use crate::error::AdapterError;
use crate::model::{IntegrationConfig, IntegrationType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER_ID: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Adapter for `openai` integrations.
///
/// Settings: `apiKey` (required), `baseUrl` and `model` (optional).
pub struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    /// Creates the adapter with its own HTTP client.
    pub fn new() -> Self {
        Self { client: http_client() }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntegrationAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn kind(&self) -> IntegrationType {
        IntegrationType::AiEngine
    }

    async fn fetch(&self, config: &IntegrationConfig) -> Result<Value, AdapterError> {
        let api_key = required(config, "apiKey")?;
        let base = config.setting("baseUrl").unwrap_or(DEFAULT_BASE_URL);
        let request = self
            .client
            .get(format!("{}/models", base.trim_end_matches('/')))
            .bearer_auth(api_key);
        let list: ModelList = send_json(request).await?;

        if let Some(model) = config.setting("model") {
            if !list.data.iter().any(|m| m.id == model) {
                return Err(AdapterError::Config(format!("model `{model}` is not available")));
            }
        }
        Ok(json!({ "models": list.data.len() }))
    }
}
