//! Integration commands.

use super::{format_millis, Format};
use crate::IntegrationCommand;
use homestead_integrations::{
    AdapterRegistry, IntegrationConfig, IntegrationLog, IntegrationOrchestrator, OrchestratorConfig,
    SyncOutcome,
};
use homestead_store::StoreHandle;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(handle: StoreHandle, fetch_timeout_secs: u64) -> Arc<IntegrationOrchestrator> {
    let config = OrchestratorConfig::default()
        .with_fetch_timeout(Duration::from_secs(fetch_timeout_secs.max(1)));
    Arc::new(IntegrationOrchestrator::new(
        handle,
        AdapterRegistry::with_defaults(),
        config,
    ))
}

/// Runs an `integrations` subcommand.
pub async fn run(
    handle: StoreHandle,
    command: IntegrationCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        IntegrationCommand::List { format } => {
            let configs = orchestrator(handle, 30).repository().list()?;
            print_configs(&configs, format)?;
        }
        IntegrationCommand::Create {
            name,
            provider,
            kind,
            id,
            settings,
        } => {
            let orchestrator = orchestrator(handle, 30);
            if !orchestrator.registry().contains(&provider) {
                eprintln!(
                    "warning: no built-in adapter for `{provider}` (known: {})",
                    orchestrator.registry().providers().join(", ")
                );
            }
            let mut config = IntegrationConfig::new(name, provider, kind);
            if let Some(id) = id {
                config = config.with_id(id);
            }
            config.settings = settings.into_iter().collect();
            let config = orchestrator.repository().create(config)?;
            println!("Created integration {}", config.id);
        }
        IntegrationCommand::SetStatus { id, status } => {
            let config = orchestrator(handle, 30).repository().set_status(&id, status)?;
            println!("Integration {} is now {}", config.id, config.status.as_str());
        }
        IntegrationCommand::UpdateSettings { id, name, settings } => {
            let settings: BTreeMap<String, String> = settings.into_iter().collect();
            let config = orchestrator(handle, 30)
                .repository()
                .update_settings(&id, name, settings)?;
            println!("Updated integration {} ({} setting(s))", config.id, config.settings.len());
        }
        IntegrationCommand::Sync {
            id,
            fetch_timeout_secs,
        } => {
            let outcome = orchestrator(handle, fetch_timeout_secs)
                .sync_integration(&id)
                .await?;
            print_outcome(&id, &outcome);
            if matches!(outcome, SyncOutcome::Failed(_)) {
                return Err(format!("Integration {id} failed to sync").into());
            }
        }
        IntegrationCommand::SyncAll { fetch_timeout_secs } => {
            let runs = orchestrator(handle, fetch_timeout_secs).sync_all_active().await?;
            if runs.is_empty() {
                println!("No active integrations");
            }
            let mut failed = 0;
            for run in &runs {
                match &run.outcome {
                    Ok(outcome) => {
                        if matches!(outcome, SyncOutcome::Failed(_)) {
                            failed += 1;
                        }
                        print_outcome(&run.integration_id, outcome);
                    }
                    Err(e) => {
                        failed += 1;
                        println!("{}: error: {e}", run.integration_id);
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} integration(s) failed").into());
            }
        }
        IntegrationCommand::Logs { id, limit, format } => {
            let mut logs = orchestrator(handle, 30).repository().logs_for(&id)?;
            logs.truncate(limit);
            print_logs(&logs, format)?;
        }
    }
    Ok(())
}

fn print_configs(
    configs: &[IntegrationConfig],
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(configs)?),
        Format::Text => {
            if configs.is_empty() {
                println!("No integrations");
                return Ok(());
            }
            println!(
                "{:<36}  {:<20}  {:<14}  {:<16}  {:<8}  {:>6}  {:<14}",
                "ID", "NAME", "PROVIDER", "TYPE", "STATUS", "ERRORS", "LAST SYNC"
            );
            for config in configs {
                println!(
                    "{:<36}  {:<20}  {:<14}  {:<16}  {:<8}  {:>6}  {:<14}",
                    config.id,
                    config.name,
                    config.provider,
                    config.kind.as_str(),
                    config.status.as_str(),
                    config.error_count,
                    format_millis(config.last_sync_at),
                );
                if let Some(message) = &config.last_error_message {
                    println!("    last error: {message}");
                }
            }
        }
    }
    Ok(())
}

fn print_logs(logs: &[IntegrationLog], format: Format) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(logs)?),
        Format::Text => {
            for log in logs {
                let duration = log
                    .duration_ms
                    .map(|ms| format!(" ({ms}ms)"))
                    .unwrap_or_default();
                println!(
                    "{}  {:?}/{:?}  {}{}",
                    log.created_at, log.action, log.status, log.details, duration
                );
            }
        }
    }
    Ok(())
}

fn print_outcome(id: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Synced {
            report,
            duration_ms,
        } => println!(
            "{id}: synced in {duration_ms}ms ({} new device(s), {} reading(s), {} observation(s))",
            report.devices_created, report.readings, report.observations
        ),
        SyncOutcome::Inactive => println!("{id}: inactive, skipped"),
        SyncOutcome::AlreadyRunning => println!("{id}: already running, skipped"),
        SyncOutcome::Discarded => println!("{id}: deactivated during sync, results discarded"),
        SyncOutcome::Failed(message) => println!("{id}: failed: {message}"),
    }
}
