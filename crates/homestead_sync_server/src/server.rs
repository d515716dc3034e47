//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::replica::Replica;
use homestead_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncMessage, WireMessage,
};
use std::sync::Arc;

/// The sync server.
///
/// Handles handshake, pull and push requests against one shared
/// [`Replica`]. The same entry points back the HTTP router and in-process
/// loopback clients.
///
/// # Example
///
/// ```
/// use homestead_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.row_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server with an empty replica.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_replica(config, Arc::new(Replica::new()))
    }

    /// Creates a sync server over an existing replica.
    pub fn with_replica(config: ServerConfig, replica: Arc<Replica>) -> Self {
        let context = Arc::new(HandlerContext::new(config, replica));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a handshake request.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, String> {
        self.handler
            .handle_handshake(request)
            .map_err(|e| e.to_string())
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> Result<PullResponse, String> {
        self.handler.handle_pull(request).map_err(|e| e.to_string())
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> Result<PushResponse, String> {
        self.handler.handle_push(request).map_err(|e| e.to_string())
    }

    /// Handles a sync message (dispatches to appropriate handler).
    pub fn handle_message(&self, message: SyncMessage) -> Result<SyncMessage, String> {
        match message {
            SyncMessage::HandshakeRequest(req) => self
                .handle_handshake(req)
                .map(SyncMessage::HandshakeResponse),
            SyncMessage::PullRequest(req) => self.handle_pull(req).map(SyncMessage::PullResponse),
            SyncMessage::PushRequest(req) => self.handle_push(req).map(SyncMessage::PushResponse),
            _ => Err("unexpected message type".into()),
        }
    }

    /// Decodes a CBOR request body for `path`, handles it and encodes the
    /// response.
    pub fn dispatch(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            "/sync/handshake" => {
                let response = self.handler.handle_handshake(HandshakeRequest::decode(body)?)?;
                Ok(response.encode()?)
            }
            "/sync/pull" => {
                let response = self.handler.handle_pull(PullRequest::decode(body)?)?;
                Ok(response.encode()?)
            }
            "/sync/push" => {
                let response = self.handler.handle_push(PushRequest::decode(body)?)?;
                Ok(response.encode()?)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Same as [`dispatch`](Self::dispatch) with errors flattened to strings.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.dispatch(path, body).map_err(|e| e.to_string())
    }

    /// Issues an owner token, if auth is enabled.
    pub fn issue_token(&self, owner: &str) -> ServerResult<Vec<u8>> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::InvalidRequest("authentication is disabled".into()))?
            .create_token(owner)
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the shared replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.context.replica
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the number of rows in the replica.
    pub fn row_count(&self) -> usize {
        self.context.replica.len()
    }
}
