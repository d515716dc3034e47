//! Behavioural parity between the memory and file stores.

use homestead_store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreHandle};
use homestead_sync_protocol::Record;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Put { collection: usize, id: u8, at: i64 },
    Delete { collection: usize, id: u8 },
}

const COLLECTIONS: [&str; 3] = ["plants", "animals", "_sync_queue"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..COLLECTIONS.len(), 0u8..6, 0i64..1_000)
            .prop_map(|(collection, id, at)| Op::Put { collection, id, at }),
        1 => (0..COLLECTIONS.len(), 0u8..6)
            .prop_map(|(collection, id)| Op::Delete { collection, id }),
    ]
}

fn apply(store: &dyn RecordStore, op: &Op) {
    match op {
        Op::Put { collection, id, at } => {
            let record = Record::new(format!("r{id}"), *at).with_field("at", *at);
            store.put(COLLECTIONS[*collection], record).unwrap();
        }
        Op::Delete { collection, id } => {
            store
                .delete(COLLECTIONS[*collection], &format!("r{id}"))
                .unwrap();
        }
    }
}

fn snapshot(store: &dyn RecordStore) -> Vec<(String, Vec<Record>)> {
    COLLECTIONS
        .iter()
        .map(|c| (c.to_string(), store.get_all(c).unwrap()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn file_store_matches_memory_store(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let temp = tempdir().unwrap();
        let memory = MemoryRecordStore::new();

        {
            let file = FileRecordStore::open(temp.path(), true).unwrap();
            for op in &ops {
                apply(&memory, op);
                apply(&file, op);
            }
            prop_assert_eq!(snapshot(&memory), snapshot(&file));
        }

        let reopened = FileRecordStore::open(temp.path(), true).unwrap();
        prop_assert_eq!(snapshot(&memory), snapshot(&reopened));
    }
}

#[test]
fn concurrent_lww_writes_keep_newest() {
    let handle = StoreHandle::new(Arc::new(MemoryRecordStore::new()));

    let writers: Vec<_> = (0..16i64)
        .map(|n| {
            let handle = handle.clone();
            thread::spawn(move || {
                handle
                    .put_if_newer("tasks", Record::new("t1", n).with_field("writer", n))
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let stored = handle.get("tasks", "t1").unwrap().unwrap();
    assert_eq!(stored.updated_at, 15);
    assert_eq!(stored.field("writer").unwrap(), 15);
}

#[test]
fn durable_store_behind_handle() {
    let temp = tempdir().unwrap();
    {
        let store = Arc::new(FileRecordStore::open(temp.path(), true).unwrap());
        let handle = StoreHandle::new(store);
        handle.put("tasks", Record::new("t1", 4)).unwrap();
        assert!(!handle.put_if_newer("tasks", Record::new("t1", 3)).unwrap());
    }

    let store = FileRecordStore::open(temp.path(), true).unwrap();
    assert_eq!(store.get("tasks", "t1").unwrap().unwrap().updated_at, 4);
}
