//! Conflict records and the last-writer-wins decision.

use crate::record::{Record, SyncStatus};
use serde::{Deserialize, Serialize};

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local version and push it again.
    LocalWins,
    /// Overwrite local state with the remote version.
    RemoteWins,
}

impl Resolution {
    /// Returns the wire name of the resolution.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LocalWins => "local_wins",
            Resolution::RemoteWins => "remote_wins",
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_wins" | "local" => Ok(Resolution::LocalWins),
            "remote_wins" | "remote" => Ok(Resolution::RemoteWins),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// A detected divergence between a local change and a remote version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLog {
    /// Conflict identifier.
    pub id: String,
    /// Collection of the conflicted record.
    pub store_name: String,
    /// Id of the conflicted record.
    pub record_id: String,
    /// Local version; absent when the local change is a delete.
    #[serde(default)]
    pub local_version: Option<Record>,
    /// Remote version; absent when the remote row is a tombstone.
    #[serde(default)]
    pub remote_version: Option<Record>,
    /// Remote `updatedAt` that triggered (or last refreshed) the conflict.
    #[serde(default)]
    pub remote_updated_at: i64,
    /// Whether the conflict has been settled.
    pub resolved: bool,
    /// How it was settled.
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Detection time (Unix millis).
    pub detected_at: i64,
    /// Resolution time (Unix millis).
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl ConflictLog {
    /// Creates an unresolved conflict.
    pub fn new(
        id: impl Into<String>,
        store_name: impl Into<String>,
        record_id: impl Into<String>,
        local_version: Option<Record>,
        remote_version: Option<Record>,
        remote_updated_at: i64,
        detected_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            store_name: store_name.into(),
            record_id: record_id.into(),
            local_version,
            remote_version,
            remote_updated_at,
            resolved: false,
            resolution: None,
            detected_at,
            resolved_at: None,
        }
    }

    /// Marks the conflict resolved.
    pub fn resolve(&mut self, resolution: Resolution, at: i64) {
        self.resolved = true;
        self.resolution = Some(resolution);
        self.resolved_at = Some(at);
    }
}

/// What a pull should do with one remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    /// Write the remote version locally.
    Apply,
    /// Leave local state as is.
    Skip,
    /// Record a conflict and suspend the id.
    Conflict,
}

/// Returns true if a remote version may overwrite the local one.
///
/// A remote version applies when nothing is stored locally, or when the
/// local record is `synced` and strictly older. A `pending` local record is
/// never overwritten.
pub fn should_apply_remote(local: Option<&Record>, remote_updated_at: i64) -> bool {
    match local {
        None => true,
        Some(local) => {
            local.sync_status == SyncStatus::Synced && remote_updated_at > local.updated_at
        }
    }
}

/// Classifies one remote row during a pull.
///
/// `outstanding` is true when the outbox holds a non-done item for the id;
/// `last_synced` is the `updatedAt` both sides last agreed on.
pub fn decide_remote(
    local: Option<&Record>,
    outstanding: bool,
    last_synced: Option<i64>,
    remote_updated_at: i64,
) -> RemoteDecision {
    if outstanding {
        if last_synced == Some(remote_updated_at) {
            RemoteDecision::Skip
        } else {
            RemoteDecision::Conflict
        }
    } else if should_apply_remote(local, remote_updated_at) {
        RemoteDecision::Apply
    } else {
        RemoteDecision::Skip
    }
}
