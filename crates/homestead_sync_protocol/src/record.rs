//! The generic record every collection stores.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Field names every record carries alongside its opaque payload.
const BASE_FIELDS: [&str; 4] = ["id", "createdAt", "updatedAt", "syncStatus"];

/// Returns the current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Sync state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The record has a local change the remote has not acknowledged.
    Pending,
    /// The record matches the last version exchanged with the remote.
    Synced,
}

impl SyncStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

/// Anything the sync core can version.
///
/// Domain entities embed the sync fields by composition and implement this
/// trait, so the core never needs to know domain-specific fields.
pub trait Syncable {
    /// Record identifier, unique within its collection.
    fn id(&self) -> &str;

    /// Last modification time (Unix millis).
    fn updated_at(&self) -> i64;

    /// Current sync state.
    fn sync_status(&self) -> SyncStatus;
}

/// An opaque versioned record keyed by `(collection, id)`.
///
/// Only the four base fields are interpreted by the sync core; everything
/// else travels untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Record identifier.
    pub id: String,
    /// Creation time (Unix millis).
    pub created_at: i64,
    /// Last modification time (Unix millis).
    pub updated_at: i64,
    /// Sync state.
    pub sync_status: SyncStatus,
    /// Opaque payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty pending record stamped with `at`.
    pub fn new(id: impl Into<String>, at: i64) -> Self {
        Self {
            id: id.into(),
            created_at: at,
            updated_at: at,
            sync_status: SyncStatus::Pending,
            fields: Map::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(key, value);
        self
    }

    /// Sets the sync status.
    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    /// Sets the modification time.
    #[must_use]
    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Sets a payload field, ignoring attempts to shadow a base field.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if BASE_FIELDS.contains(&key.as_str()) {
            return;
        }
        self.fields.insert(key, value.into());
    }

    /// Returns a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the value of `name` as seen by an index lookup.
    ///
    /// Base fields are addressable by their camelCase names.
    pub fn index_value(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id.clone())),
            "createdAt" => Some(Value::from(self.created_at)),
            "updatedAt" => Some(Value::from(self.updated_at)),
            "syncStatus" => Some(Value::from(self.sync_status.as_str())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Converts a domain entity that serializes the four base fields.
    pub fn from_entity<T: Serialize>(entity: &T) -> ProtocolResult<Self> {
        let value = serde_json::to_value(entity)?;
        if !value.is_object() {
            return Err(ProtocolError::InvalidRecord(
                "entity must serialize to an object".into(),
            ));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }

    /// Wraps an internal bookkeeping entity that does not carry sync fields.
    ///
    /// The result is always `synced`: bookkeeping rows never enter the outbox.
    pub fn bookkeeping<T: Serialize>(
        id: impl Into<String>,
        at: i64,
        entity: &T,
    ) -> ProtocolResult<Self> {
        let Value::Object(mut fields) = serde_json::to_value(entity)? else {
            return Err(ProtocolError::InvalidRecord(
                "entity must serialize to an object".into(),
            ));
        };
        for key in BASE_FIELDS {
            fields.remove(key);
        }
        Ok(Self {
            id: id.into(),
            created_at: at,
            updated_at: at,
            sync_status: SyncStatus::Synced,
            fields,
        })
    }

    /// Converts this record into a typed entity.
    ///
    /// Unknown fields are ignored, so entities may read a subset.
    pub fn to_entity<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }

    /// Encodes the record as the opaque JSON blob stored by the remote replica.
    pub fn to_blob(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a record from a remote JSON blob.
    pub fn from_blob(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }
}

impl Syncable for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }
}
