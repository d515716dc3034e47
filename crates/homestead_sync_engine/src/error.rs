//! Error types for the sync engine.

use homestead_store::StoreError;
use homestead_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The replica refused a change permanently.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The replica holds a newer version than the pushed change.
    #[error("stale: {0}")]
    Stale(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Record conversion error.
    #[error("record error: {0}")]
    Record(#[from] ProtocolError),

    /// Another sync cycle is already running.
    #[error("a sync cycle is already in progress")]
    CycleBusy,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// No conflict with the given id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// The conflict was already resolved.
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// Writes to reserved collections are not tracked.
    #[error("collection is reserved for sync bookkeeping: {0}")]
    ReservedCollection(String),

    /// Version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::ServerError(_)
            | SyncError::Stale(_) => true,
            _ => false,
        }
    }

    /// Returns true if retrying the same change can never succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => !*retryable,
            SyncError::Rejected(_)
            | SyncError::Protocol(_)
            | SyncError::AuthenticationFailed(_)
            | SyncError::VersionMismatch { .. } => true,
            _ => false,
        }
    }
}
