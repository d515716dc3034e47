//! Per-integration interval schedules.
//!
//! Each enabled integration syncs every `syncIntervalSecs` seconds (or the
//! default interval). A tick loop looks for due integrations and spawns
//! their syncs; a sync still running when its next slot comes up is skipped
//! by the orchestrator.

use crate::config::ScheduleConfig;
use crate::model::IntegrationConfig;
use crate::orchestrator::IntegrationOrchestrator;
use homestead_sync_protocol::now_millis;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Setting that overrides the default interval for one integration.
pub const INTERVAL_SETTING: &str = "syncIntervalSecs";

/// Returns the sync interval of `config`.
pub fn interval_for(config: &IntegrationConfig, default: Duration) -> Duration {
    match config.setting(INTERVAL_SETTING).map(str::parse::<u64>) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            warn!(integration = %config.id, "ignoring invalid {INTERVAL_SETTING}");
            default
        }
        None => default,
    }
}

/// Returns the ids of enabled integrations whose next run is due at `now`.
///
/// `last_runs` holds the start time of each integration's previous
/// scheduled run; integrations never run before are due immediately.
pub fn due_integrations(
    configs: &[IntegrationConfig],
    last_runs: &HashMap<String, i64>,
    now: i64,
    default: Duration,
) -> Vec<String> {
    configs
        .iter()
        .filter(|c| c.is_enabled())
        .filter(|c| {
            let period = i64::try_from(interval_for(c, default).as_millis()).unwrap_or(i64::MAX);
            last_runs
                .get(&c.id)
                .map_or(true, |last| now.saturating_sub(*last) >= period)
        })
        .map(|c| c.id.clone())
        .collect()
}

/// Drives an [`IntegrationOrchestrator`] on per-integration intervals.
pub struct IntegrationScheduler {
    orchestrator: Arc<IntegrationOrchestrator>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntegrationScheduler {
    /// Spawns the tick loop on the current tokio runtime.
    pub fn start(orchestrator: Arc<IntegrationOrchestrator>, config: ScheduleConfig) -> Self {
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_loop(
            Arc::clone(&orchestrator),
            config,
            Arc::clone(&shutdown),
        ));
        Self {
            orchestrator,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the driven orchestrator.
    pub fn orchestrator(&self) -> &Arc<IntegrationOrchestrator> {
        &self.orchestrator
    }

    /// Stops the tick loop and waits for it to exit.
    ///
    /// Syncs already spawned run to completion.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "integration scheduler ended abnormally");
            }
        }
    }
}

async fn run_loop(
    orchestrator: Arc<IntegrationOrchestrator>,
    config: ScheduleConfig,
    shutdown: Arc<Notify>,
) {
    let mut ticker = interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_runs: HashMap<String, i64> = HashMap::new();

    info!(tick_ms = config.tick.as_millis() as u64, "integration scheduler started");
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                let configs = match orchestrator.repository().list() {
                    Ok(configs) => configs,
                    Err(e) => {
                        warn!(error = %e, "could not list integrations");
                        continue;
                    }
                };
                let now = now_millis();
                for id in due_integrations(&configs, &last_runs, now, config.default_interval) {
                    debug!(integration = %id, "integration due");
                    last_runs.insert(id.clone(), now);
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.sync_integration(&id).await {
                            warn!(integration = %id, error = %e, "scheduled sync failed");
                        }
                    });
                }
                last_runs.retain(|id, _| configs.iter().any(|c| &c.id == id));
            }
        }
    }
    info!("integration scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IntegrationStatus, IntegrationType};

    fn config(id: &str) -> IntegrationConfig {
        IntegrationConfig::new(id, "mqtt_gateway", IntegrationType::SensorHardware).with_id(id)
    }

    #[test]
    fn interval_setting_overrides_default() {
        let default = Duration::from_secs(60);
        assert_eq!(interval_for(&config("a"), default), default);
        assert_eq!(
            interval_for(&config("a").with_setting(INTERVAL_SETTING, "5"), default),
            Duration::from_secs(5)
        );
        assert_eq!(
            interval_for(&config("a").with_setting(INTERVAL_SETTING, "soon"), default),
            default
        );
    }

    #[test]
    fn due_respects_intervals_and_status() {
        let configs = vec![
            config("fresh"),
            config("recent").with_setting(INTERVAL_SETTING, "10"),
            config("stale").with_setting(INTERVAL_SETTING, "10"),
            config("off").with_status(IntegrationStatus::Inactive),
            config("broken").with_status(IntegrationStatus::Error),
        ];
        let mut last_runs = HashMap::new();
        last_runs.insert("recent".to_string(), 95_000);
        last_runs.insert("stale".to_string(), 90_000);

        let due = due_integrations(&configs, &last_runs, 100_000, Duration::from_secs(60));
        assert_eq!(due, vec!["fresh", "stale", "broken"]);
    }
}
