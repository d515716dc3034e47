//! Reference replica commands.

use super::to_hex;
use homestead_sync_server::{serve, AuthConfig, ServerConfig, SyncServer, TokenValidator};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Runs `serve` until Ctrl-C.
pub async fn run(
    bind: SocketAddr,
    secret: Option<String>,
    max_pull_batch: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::new(bind).with_max_pull_batch(max_pull_batch);
    if let Some(secret) = secret {
        config = config.with_auth(secret.into_bytes());
    }
    let server = Arc::new(SyncServer::new(config));
    let listener = TcpListener::bind(bind).await?;

    serve(listener, server, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
    })
    .await?;
    Ok(())
}

/// Runs `token`.
pub fn issue_token(secret: &str, owner: &str) -> Result<(), Box<dyn std::error::Error>> {
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    println!("{}", to_hex(&validator.create_token(owner)?));
    Ok(())
}
