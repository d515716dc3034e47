//! Error types for adapters and the integration orchestrator.

use homestead_store::StoreError;
use homestead_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for integration operations.
pub type IntegrationResult<T> = Result<T, IntegrationError>;

/// Errors an adapter reports from `fetch` or `transform`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The provider answered with a non-success status.
    #[error("provider returned HTTP {0}")]
    Status(u16),

    /// A required setting is missing or malformed.
    #[error("invalid adapter settings: {0}")]
    Config(String),

    /// The payload did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Parse(String),

    /// The fetch did not finish within the configured timeout.
    #[error("fetch timed out")]
    Timeout,
}

impl AdapterError {
    /// Creates a missing-setting error.
    pub fn missing_setting(key: &str) -> Self {
        AdapterError::Config(format!("missing setting `{key}`"))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout
        } else if let Some(status) = e.status() {
            AdapterError::Status(status.as_u16())
        } else if e.is_decode() {
            AdapterError::Parse(e.to_string())
        } else {
            AdapterError::Network(e.to_string())
        }
    }
}

/// Errors raised by the orchestrator, repository and materializers.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// No integration with the given id.
    #[error("integration not found: {0}")]
    NotFound(String),

    /// No adapter is registered for the provider.
    #[error("no adapter registered for provider `{0}`")]
    AdapterMissing(String),

    /// The request is malformed.
    #[error("invalid integration request: {0}")]
    Invalid(String),

    /// The adapter failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Record conversion error.
    #[error("record error: {0}")]
    Record(#[from] ProtocolError),
}
