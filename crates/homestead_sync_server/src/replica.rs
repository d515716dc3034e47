//! The replica table.
//!
//! One logical table keyed by `(collection, id)`. Each row carries the
//! opaque record blob, the client-supplied `updated_at`, a tombstone flag
//! and the owner identity whose devices may see it.

use homestead_sync_protocol::{
    collections, PullResponse, PushRejection, PushRow, Record, RejectionKind, RemoteRow, RowKey,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A stored replica row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRow {
    /// Record blob, absent for tombstones.
    pub data: Option<Vec<u8>>,
    /// Version timestamp supplied by the writing client.
    pub updated_at: i64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Owner identity.
    pub owner: String,
}

impl ReplicaRow {
    fn to_remote(&self, key: &RowKey) -> RemoteRow {
        RemoteRow {
            collection: key.collection.clone(),
            id: key.id.clone(),
            data: self.data.clone(),
            updated_at: self.updated_at,
            deleted: self.deleted,
            owner: self.owner.clone(),
        }
    }

    fn same_version(&self, row: &PushRow) -> bool {
        self.updated_at == row.updated_at && self.deleted == row.deleted && self.data == row.data
    }
}

/// In-memory replica table.
#[derive(Debug, Default)]
pub struct Replica {
    rows: RwLock<BTreeMap<RowKey, ReplicaRow>>,
}

impl Replica {
    /// Creates an empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the replica holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Gets a row by key.
    pub fn get(&self, key: &RowKey) -> Option<ReplicaRow> {
        self.rows.read().get(key).cloned()
    }

    /// Writes a row directly, bypassing version checks.
    ///
    /// Used to simulate writes from other systems.
    pub fn insert(&self, key: RowKey, row: ReplicaRow) {
        self.rows.write().insert(key, row);
    }

    /// Upserts a pushed row on behalf of `owner`.
    ///
    /// A replay of the stored version is accepted unchanged. Otherwise the
    /// row is stale when the stored version is newer or when the client's
    /// base does not match the stored version.
    pub fn upsert(&self, owner: &str, row: &PushRow) -> Result<(), PushRejection> {
        if let Err(reason) = validate(row) {
            return Err(rejection(row, RejectionKind::Invalid, reason));
        }

        let key = row.key();
        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&key) {
            if existing.owner != owner {
                return Err(rejection(
                    row,
                    RejectionKind::Invalid,
                    "row belongs to another owner".into(),
                ));
            }
            if existing.same_version(row) {
                return Ok(());
            }
            if existing.updated_at > row.updated_at {
                return Err(stale(
                    row,
                    existing.to_remote(&key),
                    format!(
                        "stored version {} is newer than {}",
                        existing.updated_at, row.updated_at
                    ),
                ));
            }
            if row.base_updated_at != Some(existing.updated_at) {
                return Err(stale(
                    row,
                    existing.to_remote(&key),
                    format!(
                        "base {:?} does not match stored version {}",
                        row.base_updated_at, existing.updated_at
                    ),
                ));
            }
        }

        rows.insert(
            key,
            ReplicaRow {
                data: if row.deleted { None } else { row.data.clone() },
                updated_at: row.updated_at,
                deleted: row.deleted,
                owner: owner.to_string(),
            },
        );
        Ok(())
    }

    /// Returns the page of rows visible to `owner` with `updated_at > cursor`.
    ///
    /// Rows are ordered by `(updated_at, collection, id)`. A page holds at
    /// least `limit` rows when available and is extended so that rows sharing
    /// the last `updated_at` are never split across pages.
    pub fn changes_since(&self, owner: &str, cursor: i64, limit: usize) -> PullResponse {
        let rows = self.rows.read();
        let mut visible: Vec<(&RowKey, &ReplicaRow)> = rows
            .iter()
            .filter(|(_, row)| row.owner == owner && row.updated_at > cursor)
            .collect();
        visible.sort_by(|a, b| a.1.updated_at.cmp(&b.1.updated_at).then_with(|| a.0.cmp(b.0)));

        let mut end = visible.len().min(limit.max(1));
        if let Some(last) = end.checked_sub(1).map(|i| visible[i].1.updated_at) {
            while end < visible.len() && visible[end].1.updated_at == last {
                end += 1;
            }
        }

        let page: Vec<RemoteRow> = visible[..end]
            .iter()
            .map(|(key, row)| row.to_remote(key))
            .collect();
        let next_cursor = page.last().map_or(cursor, |row| row.updated_at);

        PullResponse {
            rows: page,
            cursor: next_cursor,
            has_more: end < visible.len(),
        }
    }
}

fn validate(row: &PushRow) -> Result<(), String> {
    if row.collection.is_empty() || row.id.is_empty() {
        return Err("collection and id are required".into());
    }
    if collections::is_reserved(&row.collection) {
        return Err(format!("collection {} is reserved", row.collection));
    }
    if row.updated_at < 0 {
        return Err("updated_at must not be negative".into());
    }
    if row.deleted {
        return Ok(());
    }
    let data = row.data.as_deref().ok_or("live row without data")?;
    let record = Record::from_blob(data).map_err(|e| format!("malformed record: {e}"))?;
    if record.id != row.id {
        return Err(format!("record id {} does not match row id {}", record.id, row.id));
    }
    Ok(())
}

fn rejection(row: &PushRow, kind: RejectionKind, reason: String) -> PushRejection {
    PushRejection {
        key: row.key(),
        kind,
        reason,
        current: None,
    }
}

/// A stale rejection carrying the stored version, so the device can record
/// the conflict without waiting for a pull.
fn stale(row: &PushRow, current: RemoteRow, reason: String) -> PushRejection {
    PushRejection {
        current: Some(current),
        ..rejection(row, RejectionKind::Stale, reason)
    }
}
