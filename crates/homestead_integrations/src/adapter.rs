//! The adapter contract and the registry keyed by provider id.

use crate::adapters::{MqttGatewayAdapter, OpenAiAdapter, WeatherApiAdapter};
use crate::error::AdapterError;
use crate::model::{IntegrationConfig, IntegrationType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A source of third-party data.
///
/// `fetch` talks to the provider; `transform` normalizes the raw payload
/// into the shape the integration type's materializer expects. Adapters
/// are stateless apart from their HTTP client and may be called
/// concurrently for different integrations.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Provider id the registry is keyed by.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Which materializer the payload is meant for.
    fn kind(&self) -> IntegrationType;

    /// Retrieves the raw provider payload for `config`.
    async fn fetch(&self, config: &IntegrationConfig) -> Result<Value, AdapterError>;

    /// Normalizes a raw payload. The default passes it through.
    fn transform(&self, raw: Value) -> Result<Value, AdapterError> {
        Ok(raw)
    }
}

/// Provider id → adapter, built once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn IntegrationAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in HTTP adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MqttGatewayAdapter::new()));
        registry.register(Arc::new(WeatherApiAdapter::new()));
        registry.register(Arc::new(OpenAiAdapter::new()));
        registry
    }

    /// Registers `adapter` under its id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn IntegrationAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Builder-style [`AdapterRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn IntegrationAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Returns the adapter for `provider`.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn IntegrationAdapter>> {
        self.adapters.get(provider).cloned()
    }

    /// Returns true if an adapter is registered for `provider`.
    pub fn contains(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Returns the registered provider ids, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
