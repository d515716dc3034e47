//! Error types for record store operations.

use homestead_sync_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be converted.
    #[error("record conversion error: {0}")]
    Record(#[from] ProtocolError),

    /// The collection name cannot be used as a file name.
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    /// The store directory is missing or not a directory.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// Another process holds the store lock.
    #[error("store is locked by another process")]
    Locked,

    /// A collection file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        StoreError::Corrupted(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            StoreError::InvalidCollection("a/b".into()).to_string(),
            "invalid collection name: a/b"
        );
        assert_eq!(StoreError::Locked.to_string(), "store is locked by another process");
    }
}
