//! # Homestead Sync Server
//!
//! Reference remote replica for Homestead sync.
//!
//! This crate provides:
//! - A replica table keyed by `(collection, id)` with owner-scoped rows
//! - Pull since an `updated_at` cursor, in pages that never split equal timestamps
//! - Push upserts with optimistic concurrency (stale / invalid rejections)
//! - Owner token authentication (HMAC-SHA256)
//! - HTTP endpoints (handshake, pull, push) with CBOR bodies
//!
//! # Authentication
//!
//! Authentication is optional:
//!
//! ```rust,ignore
//! use homestead_sync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token("alice")?;
//! ```
//!
//! # Protocol
//!
//! 1. Client handshakes with its device id and owner credentials
//! 2. Client pushes collapsed local changes with their base versions
//! 3. Client pulls rows changed since its cursor

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod http;
mod replica;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{DeviceSession, HandlerContext, RequestHandler};
pub use http::{router, serve};
pub use replica::{Replica, ReplicaRow};
pub use server::SyncServer;
