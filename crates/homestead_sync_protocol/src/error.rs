//! Error types for protocol encoding and record conversion.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or converting records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be converted to or from a [`crate::Record`].
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
