//! Sync command.

use super::from_hex;
use homestead_store::StoreHandle;
use homestead_sync_engine::{HttpTransport, ReqwestClient, SyncConfig, SyncEngine, SyncReport};
use std::sync::Arc;
use std::time::Duration;

/// Connection options for `sync`.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Replica base URL.
    pub server: String,
    /// Owner identity.
    pub owner: String,
    /// Device identifier.
    pub device: String,
    /// Hex-encoded owner token.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl SyncOptions {
    fn to_config(&self) -> Result<SyncConfig, Box<dyn std::error::Error>> {
        let mut config = SyncConfig::new(&self.device, &self.owner, &self.server)
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)));
        if let Some(token) = &self.token {
            config = config.with_token(from_hex(token)?);
        }
        Ok(config)
    }
}

/// Runs one sync cycle against `options.server`.
pub async fn run(
    handle: StoreHandle,
    options: SyncOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.to_config()?;
    let client = ReqwestClient::new(config.timeout)?;
    let transport = HttpTransport::new(config.server_url.clone(), client);
    let engine = SyncEngine::new(config, Arc::new(transport), handle);

    let recovered = engine.recover()?;
    if recovered > 0 {
        println!("Recovered {recovered} interrupted outbox item(s)");
    }

    let report = engine.run_sync_cycle().await?;
    print_report(&report);
    if !report.success {
        return Err("Sync cycle finished with errors".into());
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Sync cycle finished in {:?}", report.duration);
    println!("  Pushed:      {}", report.pushed);
    println!("  Pulled:      {}", report.pulled);
    println!("  Conflicts:   {}", report.conflicts);
    println!("  Stale:       {}", report.stale);
    println!("  Retried:     {}", report.retried);
    println!("  Failed:      {}", report.failed);
    println!("  Superseded:  {}", report.superseded);
    println!("  Suspended:   {}", report.suspended);
    println!("  Skipped:     {}", report.skipped);
    for error in &report.errors {
        println!("  error: {error}");
    }
}
