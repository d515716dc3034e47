//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use homestead_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRejection, PushRequest,
    PushResponse, PushRow, RejectionKind, RemoteRow, RowKey,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A sync transport handles network communication with the remote replica.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, in-process loopback, mock for testing, etc.).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Performs a handshake with the replica.
    async fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse>;

    /// Pulls one page of rows changed after the request cursor.
    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Pushes local changes.
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// A scriptable transport for testing.
///
/// By default the handshake succeeds, pulls return empty pages and pushes
/// accept every row. Queued failures and rejections override that.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    handshake_response: Mutex<Option<HandshakeResponse>>,
    pull_pages: Mutex<VecDeque<PullResponse>>,
    push_failures: Mutex<VecDeque<SyncError>>,
    rejections: Mutex<HashMap<RowKey, PushRejection>>,
    pushed: Mutex<Vec<PushRow>>,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake response.
    pub fn set_handshake_response(&self, response: HandshakeResponse) {
        *self.handshake_response.lock() = Some(response);
    }

    /// Queues a pull page.
    pub fn push_pull_page(&self, page: PullResponse) {
        self.pull_pages.lock().push_back(page);
    }

    /// Makes the next push call fail with `error`.
    pub fn fail_next_push(&self, error: SyncError) {
        self.push_failures.lock().push_back(error);
    }

    /// Rejects every push of `key` until cleared.
    pub fn reject(&self, key: RowKey, kind: RejectionKind, reason: impl Into<String>) {
        let rejection = PushRejection {
            key: key.clone(),
            kind,
            reason: reason.into(),
            current: None,
        };
        self.rejections.lock().insert(key, rejection);
    }

    /// Rejects every push of `key` as stale against `current` until cleared.
    pub fn reject_stale(&self, key: RowKey, current: RemoteRow) {
        let rejection = PushRejection {
            key: key.clone(),
            kind: RejectionKind::Stale,
            reason: format!("stored version {} is newer", current.updated_at),
            current: Some(current),
        };
        self.rejections.lock().insert(key, rejection);
    }

    /// Stops rejecting `key`.
    pub fn clear_rejection(&self, key: &RowKey) {
        self.rejections.lock().remove(key);
    }

    /// Simulates losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns every row accepted so far.
    pub fn pushed_rows(&self) -> Vec<PushRow> {
        self.pushed.lock().clone()
    }

    /// Returns the number of push calls made.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of pull calls made.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> SyncResult<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn handshake(&self, _request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.simulate().await?;
        Ok(self
            .handshake_response
            .lock()
            .clone()
            .unwrap_or_else(|| HandshakeResponse::success(0)))
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.simulate().await?;
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pull_pages.lock().pop_front().unwrap_or(PullResponse {
            rows: Vec::new(),
            cursor: request.cursor,
            has_more: false,
        }))
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.simulate().await?;
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.push_failures.lock().pop_front() {
            return Err(error);
        }

        let rejections = self.rejections.lock();
        let mut response = PushResponse::default();
        let mut pushed = self.pushed.lock();
        for row in &request.rows {
            let key = row.key();
            match rejections.get(&key) {
                Some(rejection) => response.rejected.push(rejection.clone()),
                None => {
                    pushed.push(row.clone());
                    response.accepted.push(key);
                }
            }
        }
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestead_sync_protocol::Credentials;

    fn push_request(ids: &[&str]) -> PushRequest {
        PushRequest {
            credentials: Credentials::new("alice"),
            rows: ids
                .iter()
                .map(|id| PushRow {
                    collection: "tasks".into(),
                    id: (*id).into(),
                    data: None,
                    updated_at: 1,
                    deleted: true,
                    base_updated_at: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn defaults_accept_everything() {
        let transport = MockTransport::new();
        let request = HandshakeRequest::new("d", Credentials::new("alice"));
        assert!(transport.handshake(&request).await.unwrap().success);

        let response = transport.push(&push_request(&["a", "b"])).await.unwrap();
        assert_eq!(response.accepted.len(), 2);
        assert_eq!(transport.pushed_rows().len(), 2);
    }

    #[tokio::test]
    async fn scripted_rejection_and_failure() {
        let transport = MockTransport::new();
        transport.reject(RowKey::new("tasks", "a"), RejectionKind::Stale, "newer remote");
        transport.fail_next_push(SyncError::Timeout);

        assert!(matches!(
            transport.push(&push_request(&["a"])).await,
            Err(SyncError::Timeout)
        ));

        let response = transport.push(&push_request(&["a", "b"])).await.unwrap();
        assert_eq!(response.rejected.len(), 1);
        assert_eq!(response.rejected[0].kind, RejectionKind::Stale);
        assert_eq!(response.accepted, vec![RowKey::new("tasks", "b")]);
        assert_eq!(transport.push_calls(), 2);
    }

    #[tokio::test]
    async fn offline_transport_errors() {
        let transport = MockTransport::new();
        transport.set_offline(true);
        assert!(!transport.is_connected());

        let request = PullRequest {
            credentials: Credentials::new("alice"),
            cursor: 0,
            limit: 10,
        };
        assert!(matches!(
            transport.pull(&request).await,
            Err(SyncError::NotConnected)
        ));
    }
}
