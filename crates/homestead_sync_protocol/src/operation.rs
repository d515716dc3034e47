//! Outbox items.

use serde::{Deserialize, Serialize};

/// Type of a local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Record was created or updated.
    Put,
    /// Record was deleted.
    Delete,
}

impl Operation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Delete => "delete",
        }
    }
}

/// Lifecycle state of an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be pushed.
    Pending,
    /// Claimed by the running sync cycle.
    Processing,
    /// Gave up; needs operator attention.
    Failed,
    /// Acknowledged by the remote, or superseded.
    Done,
}

impl QueueStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
            QueueStatus::Done => "done",
        }
    }

    /// Returns true while the item still represents an unconfirmed local change.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, QueueStatus::Done)
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "failed" => Ok(QueueStatus::Failed),
            "done" => Ok(QueueStatus::Done),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

/// One pending local change awaiting upload.
///
/// The item only references the record (`payload_ref` is the record id); the
/// payload uploaded is whatever the store holds when the push runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Item identifier.
    pub id: String,
    /// Collection of the changed record.
    pub store_name: String,
    /// Kind of change.
    pub operation: Operation,
    /// Id of the changed record.
    pub payload_ref: String,
    /// Time the change was recorded (Unix millis).
    pub timestamp: i64,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Last error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of failed transient attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the item may be pushed again (Unix millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<i64>,
}

impl SyncQueueItem {
    /// Creates a pending item.
    pub fn new(
        id: impl Into<String>,
        store_name: impl Into<String>,
        operation: Operation,
        payload_ref: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            store_name: store_name.into(),
            operation,
            payload_ref: payload_ref.into(),
            timestamp,
            status: QueueStatus::Pending,
            error: None,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    /// Returns the `(store_name, record id)` key this item targets.
    pub fn key(&self) -> (&str, &str) {
        (&self.store_name, &self.payload_ref)
    }

    /// Returns true if the item may be pushed at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        matches!(self.status, QueueStatus::Pending | QueueStatus::Processing)
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Collapses outstanding items to the latest per `(store_name, payload_ref)`.
///
/// Returns `(latest, superseded)`. Items are ordered by
/// `(store_name, payload_ref, timestamp)`; ties on timestamp keep the later
/// input position.
pub fn collapse(items: Vec<SyncQueueItem>) -> (Vec<SyncQueueItem>, Vec<SyncQueueItem>) {
    let mut items: Vec<(usize, SyncQueueItem)> = items.into_iter().enumerate().collect();
    items.sort_by(|(ia, a), (ib, b)| {
        a.store_name
            .cmp(&b.store_name)
            .then_with(|| a.payload_ref.cmp(&b.payload_ref))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| ia.cmp(ib))
    });

    let mut latest: Vec<SyncQueueItem> = Vec::new();
    let mut superseded = Vec::new();
    for (_, item) in items {
        match latest.last_mut() {
            Some(last) if last.key() == item.key() => {
                superseded.push(std::mem::replace(last, item));
            }
            _ => latest.push(item),
        }
    }
    (latest, superseded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, store: &str, rec: &str, op: Operation, ts: i64) -> SyncQueueItem {
        SyncQueueItem::new(id, store, op, rec, ts)
    }

    #[test]
    fn serde_shape() {
        let item = item("q1", "tasks", "t1", Operation::Put, 5);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["storeName"], "tasks");
        assert_eq!(value["operation"], "put");
        assert_eq!(value["status"], "pending");
        assert!(value.get("error").is_none());

        let back: SyncQueueItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn collapse_keeps_latest_per_key() {
        let items = vec![
            item("a", "tasks", "t1", Operation::Put, 3),
            item("b", "tasks", "t2", Operation::Put, 1),
            item("c", "tasks", "t1", Operation::Put, 1),
            item("d", "tasks", "t1", Operation::Delete, 2),
        ];

        let (latest, superseded) = collapse(items);
        let ids: Vec<_> = latest.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let mut gone: Vec<_> = superseded.iter().map(|i| i.id.as_str()).collect();
        gone.sort_unstable();
        assert_eq!(gone, vec!["c", "d"]);
    }

    #[test]
    fn collapse_tie_prefers_later_input() {
        let items = vec![
            item("first", "tasks", "t1", Operation::Put, 7),
            item("second", "tasks", "t1", Operation::Delete, 7),
        ];
        let (latest, superseded) = collapse(items);
        assert_eq!(latest[0].id, "second");
        assert_eq!(superseded[0].id, "first");
    }

    #[test]
    fn due_respects_backoff() {
        let mut it = item("a", "tasks", "t1", Operation::Put, 0);
        assert!(it.is_due(0));
        it.next_attempt_at = Some(100);
        assert!(!it.is_due(99));
        assert!(it.is_due(100));
        it.status = QueueStatus::Failed;
        assert!(!it.is_due(1_000));
    }

    #[test]
    fn status_parse() {
        assert_eq!("failed".parse::<QueueStatus>().unwrap(), QueueStatus::Failed);
        assert!("bogus".parse::<QueueStatus>().is_err());
        assert!(QueueStatus::Failed.is_outstanding());
        assert!(!QueueStatus::Done.is_outstanding());
    }
}
