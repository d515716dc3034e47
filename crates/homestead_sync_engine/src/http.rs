//! HTTP transport implementation.
//!
//! Requests and responses travel as CBOR bodies posted to
//! `/sync/{handshake,pull,push}`. The HTTP client itself is abstracted so
//! tests can route requests straight into an in-process replica.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use homestead_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    WireMessage,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implementations classify failures: connection problems and 5xx
/// responses are retryable, 4xx responses are not.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the replica (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage + Sync,
        Res: WireMessage,
    {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, bytes = body.len(), "posting sync request");

        let response_body = match self.client.post(&url, body).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%url, error = %e, "sync request failed");
                *self.last_error.write() = Some(e.to_string());
                if e.is_retryable() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        *self.last_error.write() = None;

        Res::decode(&response_body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

#[async_trait]
impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.post_cbor("/sync/handshake", request).await
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_cbor("/sync/pull", request).await
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_cbor("/sync/push", request).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/cbor")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout
                } else {
                    SyncError::transport_retryable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::AuthenticationFailed(status.to_string()));
        }
        if status.is_client_error() {
            return Err(SyncError::transport_fatal(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(SyncError::ServerError(format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::transport_retryable(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Trait for replicas that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An HTTP client that routes requests directly to an in-process replica.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given replica.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates the network going down or coming back.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns the wrapped replica.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.is_healthy() {
            return Err(SyncError::NotConnected);
        }
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server
            .handle_post(path, &body)
            .map_err(SyncError::ServerError)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
