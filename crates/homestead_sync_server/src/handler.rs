//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::replica::Replica;
use homestead_sync_protocol::{
    now_millis, Credentials, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse,
    PushRequest, PushResponse, PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Replica table (shared across all handlers).
    pub replica: Arc<Replica>,
    validator: Option<TokenValidator>,
    /// Device sessions (device_id -> session info).
    sessions: RwLock<HashMap<String, DeviceSession>>,
}

/// Information about a device that completed a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    /// Owner identity the device authenticated as.
    pub owner: String,
    /// Time of the latest handshake.
    pub connected_at: i64,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, replica: Arc<Replica>) -> Self {
        let validator = match (config.require_auth, &config.auth_secret) {
            (true, Some(secret)) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            replica,
            validator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the token validator when auth is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Gets a device session.
    pub fn session(&self, device_id: &str) -> Option<DeviceSession> {
        self.sessions.read().get(device_id).cloned()
    }

    /// Returns the number of devices that completed a handshake.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn register_session(&self, device_id: &str, owner: &str) {
        let session = DeviceSession {
            owner: owner.to_string(),
            connected_at: now_millis(),
        };
        self.sessions.write().insert(device_id.to_string(), session);
    }

    fn authenticate(&self, credentials: &Credentials) -> ServerResult<()> {
        if credentials.owner.is_empty() {
            return Err(ServerError::NotAuthorized("missing owner".into()));
        }
        if self.config.require_auth {
            let validator = self
                .validator
                .as_ref()
                .ok_or_else(|| ServerError::Internal("auth enabled without a secret".into()))?;
            let token = credentials
                .token
                .as_deref()
                .ok_or_else(|| ServerError::AuthenticationFailed("missing token".into()))?;
            validator.validate_token(token, &credentials.owner)?;
        }
        Ok(())
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a handshake request.
    ///
    /// Version and credential failures are reported in the response so the
    /// client can tell them apart from transport errors.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Ok(HandshakeResponse::error(
                ServerError::ProtocolMismatch(format!(
                    "unsupported protocol version {}",
                    request.protocol_version
                ))
                .to_string(),
            ));
        }

        if let Err(e) = self.context.authenticate(&request.credentials) {
            warn!(device = %request.device_id, error = %e, "handshake rejected");
            return Ok(HandshakeResponse::error(e.to_string()));
        }

        self.context
            .register_session(&request.device_id, &request.credentials.owner);
        info!(device = %request.device_id, owner = %request.credentials.owner, "device connected");
        Ok(HandshakeResponse::success(now_millis()))
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.context.authenticate(&request.credentials)?;

        let limit = request.limit.min(self.context.config.max_pull_batch).max(1);
        let response =
            self.context
                .replica
                .changes_since(&request.credentials.owner, request.cursor, limit as usize);
        debug!(
            owner = %request.credentials.owner,
            cursor = request.cursor,
            rows = response.rows.len(),
            has_more = response.has_more,
            "pull served"
        );
        Ok(response)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.context.authenticate(&request.credentials)?;

        if request.rows.len() > self.context.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "too many rows: {} > {}",
                request.rows.len(),
                self.context.config.max_push_batch
            )));
        }

        let owner = &request.credentials.owner;
        let mut response = PushResponse::default();
        for row in &request.rows {
            match self.context.replica.upsert(owner, row) {
                Ok(()) => response.accepted.push(row.key()),
                Err(rejection) => {
                    debug!(
                        key = %rejection.key,
                        kind = ?rejection.kind,
                        reason = %rejection.reason,
                        "row rejected"
                    );
                    response.rejected.push(rejection);
                }
            }
        }
        info!(
            owner = %owner,
            accepted = response.accepted.len(),
            rejected = response.rejected.len(),
            "push applied"
        );
        Ok(response)
    }
}
