//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum rows per pull page (ties on `updated_at` may exceed it).
    pub max_pull_batch: u32,
    /// Maximum rows per push request.
    pub max_push_batch: u32,
    /// Whether to require owner tokens.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token lifetime when auth is enabled.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_pull_batch: 500,
            max_push_batch: 100,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
