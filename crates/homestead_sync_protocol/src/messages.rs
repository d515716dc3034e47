//! Protocol messages exchanged with the remote replica.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Handshake request.
    HandshakeRequest(HandshakeRequest),
    /// Handshake response.
    HandshakeResponse(HandshakeResponse),
    /// Pull request.
    PullRequest(PullRequest),
    /// Pull response.
    PullResponse(PullResponse),
    /// Push request.
    PushRequest(PushRequest),
    /// Push response.
    PushResponse(PushResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::HandshakeRequest(_) => 1,
            SyncMessage::HandshakeResponse(_) => 2,
            SyncMessage::PullRequest(_) => 3,
            SyncMessage::PullResponse(_) => 4,
            SyncMessage::PushRequest(_) => 5,
            SyncMessage::PushResponse(_) => 6,
        }
    }
}

/// Caller identity attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Owner identity; rows are only visible to their owner.
    pub owner: String,
    /// Optional HMAC token proving the owner identity.
    #[serde(default)]
    pub token: Option<Vec<u8>>,
}

impl Credentials {
    /// Creates credentials without a token.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            token: None,
        }
    }

    /// Attaches a token.
    #[must_use]
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }
}

/// Handshake request from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Device identifier.
    pub device_id: String,
    /// Caller identity.
    pub credentials: Credentials,
    /// Protocol version spoken by the device.
    pub protocol_version: u16,
}

impl HandshakeRequest {
    /// Creates a handshake request for the current protocol version.
    pub fn new(device_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            device_id: device_id.into(),
            credentials,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Handshake response from the replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the handshake was accepted.
    pub success: bool,
    /// Replica clock (Unix millis).
    pub server_time: i64,
    /// Error message when rejected.
    #[serde(default)]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Creates an accepting response.
    pub fn success(server_time: i64) -> Self {
        Self {
            success: true,
            server_time,
            error: None,
        }
    }

    /// Creates a rejecting response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            server_time: 0,
            error: Some(message.into()),
        }
    }
}

/// Request for rows changed after a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Caller identity.
    pub credentials: Credentials,
    /// Return rows with `updated_at > cursor`.
    pub cursor: i64,
    /// Soft page size; a page may exceed it to keep equal timestamps together.
    pub limit: u32,
}

/// A page of remote rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Rows ordered by `(updated_at, collection, id)`.
    pub rows: Vec<RemoteRow>,
    /// Cursor to request the next page with.
    pub cursor: i64,
    /// Whether more rows are available.
    pub has_more: bool,
}

/// One row of the remote replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRow {
    /// Collection name.
    pub collection: String,
    /// Record id.
    pub id: String,
    /// JSON-encoded record; absent for tombstones.
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    /// Client-supplied version.
    pub updated_at: i64,
    /// Whether the row is a tombstone.
    pub deleted: bool,
    /// Owner identity.
    pub owner: String,
}

impl RemoteRow {
    /// Returns the row key.
    pub fn key(&self) -> RowKey {
        RowKey::new(&self.collection, &self.id)
    }
}

/// Upload of local changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Caller identity.
    pub credentials: Credentials,
    /// Rows to upsert.
    pub rows: Vec<PushRow>,
}

/// One uploaded change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRow {
    /// Collection name.
    pub collection: String,
    /// Record id.
    pub id: String,
    /// JSON-encoded record; absent for deletes.
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    /// Version being written.
    pub updated_at: i64,
    /// Whether this is a delete.
    pub deleted: bool,
    /// Version the change was based on, if the device has seen one.
    #[serde(default)]
    pub base_updated_at: Option<i64>,
}

impl PushRow {
    /// Returns the row key.
    pub fn key(&self) -> RowKey {
        RowKey::new(&self.collection, &self.id)
    }
}

/// `(collection, id)` pair identifying a remote row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    /// Collection name.
    pub collection: String,
    /// Record id.
    pub id: String,
}

impl RowKey {
    /// Creates a key.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Why a pushed row was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The replica holds a version the device has not seen.
    Stale,
    /// The row can never be accepted.
    Invalid,
}

/// A rejected row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRejection {
    /// Row key.
    pub key: RowKey,
    /// Rejection kind.
    pub kind: RejectionKind,
    /// Human-readable reason.
    pub reason: String,
    /// The replica's current version of a row refused as stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<RemoteRow>,
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Rows written.
    pub accepted: Vec<RowKey>,
    /// Rows refused.
    pub rejected: Vec<PushRejection>,
}
