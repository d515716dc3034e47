//! Durable record store backed by one JSON file per collection.
//!
//! ```text
//! store_dir/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ tasks.json        # One array of records per collection
//! ├─ _sync_queue.json
//! └─ ...
//! ```
//!
//! Every write rewrites the affected collection file through a temporary
//! file, `sync_all`, rename and a directory fsync, so a crash leaves either
//! the old or the new file.

use crate::backend::RecordStore;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use homestead_sync_protocol::Record;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LOCK_FILE: &str = "LOCK";
const EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// A durable record store.
///
/// Records are cached in memory and every `put`/`delete` rewrites the
/// collection file before returning. Only one process may open a directory
/// at a time.
///
/// # Example
///
/// ```no_run
/// use homestead_store::{FileRecordStore, RecordStore};
/// use homestead_sync_protocol::Record;
/// use std::path::Path;
///
/// let store = FileRecordStore::open(Path::new("homestead_data"), true).unwrap();
/// store.put("tasks", Record::new("t1", 1)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    collections: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    _lock_file: File,
}

impl FileRecordStore {
    /// Opens (or creates) a store directory and loads every collection file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - A collection file cannot be parsed
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::InvalidPath(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        let collections = load_collections(path)?;
        info!(
            path = %path.display(),
            collections = collections.len(),
            "opened file record store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            collections: RwLock::new(collections),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.path.join(format!("{collection}.{EXTENSION}"))
    }

    fn persist(
        &self,
        collection: &str,
        records: Option<&BTreeMap<String, Record>>,
    ) -> StoreResult<()> {
        let target = self.collection_path(collection);
        match records {
            Some(records) if !records.is_empty() => {
                let rows: Vec<&Record> = records.values().collect();
                let data = serde_json::to_vec(&rows)?;

                let temp = self.path.join(format!("{collection}.{EXTENSION}{TEMP_SUFFIX}"));
                let mut file = File::create(&temp)?;
                file.write_all(&data)?;
                file.sync_all()?;
                drop(file);

                fs::rename(&temp, &target)?;
            }
            _ => {
                if target.exists() {
                    fs::remove_file(&target)?;
                }
            }
        }
        self.sync_directory()?;
        debug!(collection, "persisted collection");
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn validate_collection(collection: &str) -> StoreResult<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid && collection != LOCK_FILE {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(collection.to_string()))
    }
}

fn load_collections(path: &Path) -> StoreResult<HashMap<String, BTreeMap<String, Record>>> {
    let mut collections = HashMap::new();
    for entry in fs::read_dir(path)? {
        let file_path = entry?.path();
        if file_path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            // Leftover temp files from an interrupted write end in ".tmp".
            continue;
        }
        let Some(name) = file_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let bytes = fs::read(&file_path)?;
        let rows: Vec<Record> = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::corrupted(format!("{}: {e}", file_path.display()))
        })?;
        let records: BTreeMap<String, Record> =
            rows.into_iter().map(|r| (r.id.clone(), r)).collect();
        collections.insert(name.to_string(), records);
    }
    Ok(collections)
}

impl RecordStore for FileRecordStore {
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put(&self, collection: &str, record: Record) -> StoreResult<()> {
        validate_collection(collection)?;
        let mut collections = self.collections.write();
        let mut records = collections.get(collection).cloned().unwrap_or_default();
        records.insert(record.id.clone(), record);
        self.persist(collection, Some(&records))?;
        collections.insert(collection.to_string(), records);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut collections = self.collections.write();
        let Some(current) = collections.get(collection) else {
            return Ok(false);
        };
        if !current.contains_key(id) {
            return Ok(false);
        }
        let mut records = current.clone();
        records.remove(id);
        self.persist(collection, Some(&records))?;
        if records.is_empty() {
            collections.remove(collection);
        } else {
            collections.insert(collection.to_string(), records);
        }
        Ok(true)
    }

    fn collections(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}
