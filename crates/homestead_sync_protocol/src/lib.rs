//! # Homestead Sync Protocol
//!
//! Record, outbox and wire types shared by every Homestead sync component.
//!
//! This crate provides:
//! - [`Record`], the opaque versioned blob keyed by `(collection, id)`
//! - [`SyncStatus`] and the [`Syncable`] trait domain entities implement
//! - [`SyncQueueItem`], the durable outbox entry
//! - [`ConflictLog`] and [`Resolution`] for manual conflict handling
//! - [`should_apply_remote`] / [`decide_remote`], the single last-writer-wins rule
//! - Protocol messages (Handshake, Pull, Push) with a CBOR codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod codec;
mod conflict;
mod error;
mod messages;
mod operation;
mod record;

pub use codec::{from_cbor, to_cbor, WireMessage};
pub use conflict::{decide_remote, should_apply_remote, ConflictLog, RemoteDecision, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    Credentials, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRejection,
    PushRequest, PushResponse, PushRow, RejectionKind, RemoteRow, RowKey, SyncMessage,
    PROTOCOL_VERSION,
};
pub use operation::{collapse, Operation, QueueStatus, SyncQueueItem};
pub use record::{now_millis, Record, SyncStatus, Syncable};

/// Reserved collection names owned by the sync core.
///
/// Domain collections must not use the leading underscore.
pub mod collections {
    /// Outbox of pending local changes.
    pub const SYNC_QUEUE: &str = "_sync_queue";
    /// Conflict logs awaiting (or after) manual resolution.
    pub const SYNC_CONFLICTS: &str = "_sync_conflicts";
    /// Pull cursor and last-known-synced versions.
    pub const SYNC_META: &str = "_sync_meta";

    /// Returns true if the collection is reserved for sync bookkeeping.
    pub fn is_reserved(collection: &str) -> bool {
        collection.starts_with('_')
    }
}
