//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, remote deltas and outbox
//! items that keep the invariants the sync core relies on.

use crate::fixtures::{remote_row, tombstone_row};
use homestead_sync_protocol::{Operation, Record, RemoteRow, SyncQueueItem};
use proptest::prelude::*;

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating domain collection names.
///
/// Never produces reserved (underscore-prefixed) names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,23}").expect("Invalid regex")
}

/// Strategy for generating a record with a few opaque fields.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        record_id_strategy(),
        1i64..1_000_000,
        prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..4),
    )
        .prop_map(|(id, at, fields)| {
            fields
                .into_iter()
                .fold(Record::new(id, at), |record, (k, v)| record.with_field(k, v))
        })
}

/// Strategy for generating a remote delta over a small id space.
///
/// Ids collide on purpose so deltas contain several versions of one record.
pub fn remote_delta_strategy(max_rows: usize) -> impl Strategy<Value = Vec<RemoteRow>> {
    prop::collection::vec((0u8..8, 1i64..500, any::<bool>(), any::<u16>()), 0..max_rows).prop_map(
        |rows| {
            rows.into_iter()
                .map(|(id, at, deleted, value)| {
                    let id = format!("r{id}");
                    if deleted {
                        tombstone_row("tasks", &id, at, "alice")
                    } else {
                        let record = Record::new(id, at).with_field("value", value);
                        remote_row("tasks", &record, "alice")
                    }
                })
                .collect()
        },
    )
}

/// Strategy for generating unsorted outbox items over a small key space.
pub fn queue_items_strategy(max_items: usize) -> impl Strategy<Value = Vec<SyncQueueItem>> {
    prop::collection::vec((0u8..3, 0u8..4, any::<bool>(), 0i64..1_000), 0..max_items).prop_map(
        |items| {
            items
                .into_iter()
                .enumerate()
                .map(|(i, (store, id, delete, at))| {
                    let operation = if delete { Operation::Delete } else { Operation::Put };
                    SyncQueueItem::new(
                        format!("q{i}"),
                        format!("store{store}"),
                        operation,
                        format!("r{id}"),
                        at,
                    )
                })
                .collect()
        },
    )
}

/// A local store operation.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Put a record
    Put {
        /// Target collection
        collection: String,
        /// Record to write
        record: Record,
    },
    /// Delete a record
    Delete {
        /// Target collection
        collection: String,
        /// Record id
        id: String,
    },
}

/// Strategy for generating store operations.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => (collection_name_strategy(), record_strategy())
            .prop_map(|(collection, record)| StoreOperation::Put { collection, record }),
        1 => (collection_name_strategy(), record_id_strategy())
            .prop_map(|(collection, id)| StoreOperation::Delete { collection, id }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
