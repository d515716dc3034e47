//! Owner token authentication.
//!
//! Tokens bind an owner identity to an issue time with HMAC-SHA256.
//!
//! ## Token Format
//!
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over the timestamp followed by the owner's UTF-8 bytes
//!
//! Total: 40 bytes. The owner travels next to the token in the request
//! credentials, so it is not repeated inside.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use homestead_sync_protocol::now_millis;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;
const TOKEN_LEN: usize = TIMESTAMP_LEN + SIGNATURE_LEN;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates owner tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `owner`, issued now.
    pub fn create_token(&self, owner: &str) -> ServerResult<Vec<u8>> {
        self.create_token_at(owner, now_millis())
    }

    fn create_token_at(&self, owner: &str, issued_at: i64) -> ServerResult<Vec<u8>> {
        let stamp = issued_at.to_be_bytes();
        let mac = self.mac(&stamp, owner)?;

        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&stamp);
        token.extend_from_slice(&mac.finalize().into_bytes());
        Ok(token)
    }

    /// Validates a token presented for `owner`.
    pub fn validate_token(&self, token: &[u8], owner: &str) -> ServerResult<()> {
        if token.len() != TOKEN_LEN {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }
        let (stamp, signature) = token.split_at(TIMESTAMP_LEN);

        self.mac(stamp, owner)?
            .verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid token signature".into()))?;

        let mut raw = [0u8; TIMESTAMP_LEN];
        raw.copy_from_slice(stamp);
        let issued_at = i64::from_be_bytes(raw);

        let expiry = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        if now_millis() > issued_at.saturating_add(expiry) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }
        Ok(())
    }

    fn mac(&self, stamp: &[u8], owner: &str) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(stamp);
        mac.update(owner.as_bytes());
        Ok(mac)
    }
}
