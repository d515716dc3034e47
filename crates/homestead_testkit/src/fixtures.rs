//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up record stores and the
//! records and remote rows common test scenarios need.

use homestead_store::{FileRecordStore, MemoryRecordStore, StoreHandle};
use homestead_sync_protocol::{Record, RemoteRow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store handle.
    pub handle: StoreHandle,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            handle: StoreHandle::new(Arc::new(MemoryRecordStore::new())),
            temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store =
            FileRecordStore::open(temp_dir.path(), true).expect("Failed to open file store");
        Self {
            handle: StoreHandle::new(Arc::new(store)),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes a file-backed store and opens it again from disk.
    ///
    /// Simulates an application restart. In-memory stores are returned
    /// unchanged.
    pub fn reopen(self) -> Self {
        let TestStore { handle, temp_dir } = self;
        match temp_dir {
            Some(temp_dir) => {
                drop(handle);
                let store = FileRecordStore::open(temp_dir.path(), false)
                    .expect("Failed to reopen file store");
                Self {
                    handle: StoreHandle::new(Arc::new(store)),
                    temp_dir: Some(temp_dir),
                }
            }
            None => Self { handle, temp_dir: None },
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = StoreHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use homestead_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|handle| {
///         handle.put("plants", Record::new("p1", 1)).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreHandle) -> R,
{
    let store = TestStore::memory();
    f(&store.handle)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreHandle, &Path) -> R,
{
    let store = TestStore::file();
    let path = store.path().expect("File store should have a path");
    f(&store.handle, &path)
}

/// A task record with a title.
pub fn task(id: &str, updated_at: i64, title: &str) -> Record {
    Record::new(id, updated_at).with_field("title", title)
}

/// A remote row carrying `record` for `owner`.
pub fn remote_row(collection: &str, record: &Record, owner: &str) -> RemoteRow {
    RemoteRow {
        collection: collection.to_string(),
        id: record.id.clone(),
        data: Some(record.to_blob().expect("Failed to encode record")),
        updated_at: record.updated_at,
        deleted: false,
        owner: owner.to_string(),
    }
}

/// A remote tombstone row.
pub fn tombstone_row(collection: &str, id: &str, updated_at: i64, owner: &str) -> RemoteRow {
    RemoteRow {
        collection: collection.to_string(),
        id: id.to_string(),
        data: None,
        updated_at,
        deleted: true,
        owner: owner.to_string(),
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store with `count` synced tasks, `t0..t{count}`.
    pub fn populated_store(count: usize) -> TestStore {
        let store = TestStore::memory();
        for i in 0..count {
            let record = task(&format!("t{i}"), i as i64 + 1, &format!("Task {i}"))
                .with_status(homestead_sync_protocol::SyncStatus::Synced);
            store.handle.put("tasks", record).expect("Failed to put record");
        }
        store
    }

    /// Creates one page of remote rows for `tasks`, one per id.
    pub fn remote_page(count: usize, owner: &str) -> Vec<RemoteRow> {
        (0..count)
            .map(|i| remote_row("tasks", &task(&format!("t{i}"), 100 + i as i64, "remote"), owner))
            .collect()
    }
}
