//! # Homestead Sync Engine
//!
//! Local-first outbox/inbox synchronization with a remote replica.
//!
//! This crate provides:
//! - The change interceptor and durable outbox ([`Outbox`])
//! - The single-flight sync cycle ([`SyncEngine::run_sync_cycle`])
//! - Conflict detection, storage and manual resolution
//! - Retry with bounded exponential backoff
//! - Transport abstraction with mock, loopback and HTTP/CBOR implementations
//! - A scheduler for timer, came-online and force-sync triggers
//!
//! ## Architecture
//!
//! A cycle pushes first, then pulls:
//! 1. Collapse the outbox per record and upload due items with their
//!    last-known-synced base version
//! 2. Pull rows changed after the cursor and apply them with
//!    last-writer-wins, or log a conflict when a record has an outstanding
//!    local change and the remote moved on
//!
//! ## Key Invariants
//!
//! - Items not acknowledged stay `pending` or `failed`, never lost
//! - Pull application is idempotent
//! - A conflicted record is neither pushed nor overwritten until resolved
//! - At most one cycle runs at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflicts;
mod engine;
mod error;
mod http;
mod meta;
mod outbox;
mod scheduler;
mod transport;

pub use config::{RetryConfig, SchedulerConfig, SyncConfig};
pub use conflicts::{ConflictResolver, ConflictStore};
pub use engine::{SyncEngine, SyncReport, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer, ReqwestClient};
pub use meta::SyncMeta;
pub use outbox::Outbox;
pub use scheduler::SyncScheduler;
pub use transport::{MockTransport, SyncTransport};
