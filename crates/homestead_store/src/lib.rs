//! # Homestead Store
//!
//! The Record Store contract and its implementations.
//!
//! Records are opaque versioned blobs keyed by `(collection, id)`. Stores do
//! not interpret payloads; last-writer-wins gating and per-key write
//! serialization live in [`StoreHandle`].
//!
//! ## Available Stores
//!
//! - [`MemoryRecordStore`] - For testing and ephemeral replicas
//! - [`FileRecordStore`] - Durable, one JSON file per collection
//!
//! ## Example
//!
//! ```rust
//! use homestead_store::{MemoryRecordStore, StoreHandle};
//! use homestead_sync_protocol::Record;
//! use std::sync::Arc;
//!
//! let handle = StoreHandle::new(Arc::new(MemoryRecordStore::new()));
//! assert!(handle.put_if_newer("tasks", Record::new("t1", 10)).unwrap());
//! assert!(!handle.put_if_newer("tasks", Record::new("t1", 5)).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod handle;
mod locks;
mod memory;

pub use backend::RecordStore;
pub use error::{StoreError, StoreResult};
pub use file::FileRecordStore;
pub use handle::StoreHandle;
pub use locks::KeyLocks;
pub use memory::MemoryRecordStore;
