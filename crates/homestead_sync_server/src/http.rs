//! HTTP surface: `POST /sync/{handshake,pull,push}` with CBOR bodies.

use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const CBOR_CONTENT_TYPE: &str = "application/cbor";

/// Builds the router for a sync server.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync/handshake", post(handshake))
        .route("/sync/pull", post(pull))
        .route("/sync/push", post(push))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Serves the router on `listener` until `shutdown` completes.
pub async fn serve<F>(
    listener: TcpListener,
    server: Arc<SyncServer>,
    shutdown: F,
) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "sync server listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("sync server stopped");
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handshake(State(server): State<Arc<SyncServer>>, body: Bytes) -> Response {
    respond(&server, "/sync/handshake", &body)
}

async fn pull(State(server): State<Arc<SyncServer>>, body: Bytes) -> Response {
    respond(&server, "/sync/pull", &body)
}

async fn push(State(server): State<Arc<SyncServer>>, body: Bytes) -> Response {
    respond(&server, "/sync/push", &body)
}

fn respond(server: &SyncServer, path: &str, body: &[u8]) -> Response {
    match server.dispatch(path, body) {
        Ok(bytes) => ([(header::CONTENT_TYPE, CBOR_CONTENT_TYPE)], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ServerError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use homestead_sync_protocol::{
        Credentials, PullRequest, PullResponse, PushRequest, PushResponse, PushRow, Record,
        WireMessage,
    };
    use tokio::sync::oneshot;

    async fn spawn(config: ServerConfig) -> (String, Arc<SyncServer>, oneshot::Sender<()>) {
        let server = Arc::new(SyncServer::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, Arc::clone(&server), async move {
            let _ = rx.await;
        }));
        (url, server, tx)
    }

    #[tokio::test]
    async fn push_then_pull_over_http() {
        let (url, server, stop) = spawn(ServerConfig::default()).await;
        let client = reqwest::Client::new();

        let push = PushRequest {
            credentials: Credentials::new("alice"),
            rows: vec![PushRow {
                collection: "tasks".into(),
                id: "t1".into(),
                data: Some(Record::new("t1", 5).to_blob().unwrap()),
                updated_at: 5,
                deleted: false,
                base_updated_at: None,
            }],
        };
        let resp = client
            .post(format!("{url}/sync/push"))
            .body(push.encode().unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            CBOR_CONTENT_TYPE
        );
        let body = resp.bytes().await.unwrap();
        assert_eq!(PushResponse::decode(&body).unwrap().accepted.len(), 1);
        assert_eq!(server.row_count(), 1);

        let pull = PullRequest {
            credentials: Credentials::new("alice"),
            cursor: 0,
            limit: 10,
        };
        let body = client
            .post(format!("{url}/sync/pull"))
            .body(pull.encode().unwrap())
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let page = PullResponse::decode(&body).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.cursor, 5);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn error_status_codes() {
        let config = ServerConfig::default().with_auth(b"secret".to_vec());
        let (url, _server, stop) = spawn(config).await;
        let client = reqwest::Client::new();

        let pull = PullRequest {
            credentials: Credentials::new("alice"),
            cursor: 0,
            limit: 10,
        };
        let resp = client
            .post(format!("{url}/sync/pull"))
            .body(pull.encode().unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .post(format!("{url}/sync/push"))
            .body(b"garbage".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client.get(format!("{url}/healthz")).send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let _ = stop.send(());
    }
}
