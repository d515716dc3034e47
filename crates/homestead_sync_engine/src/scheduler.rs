//! Background trigger loop for sync cycles.
//!
//! Three triggers start a cycle: the periodic timer, a came-online event and
//! an explicit force sync. Cycles never overlap; the engine's single-flight
//! guard turns a trigger that lands mid-cycle into a no-op.

use crate::config::SchedulerConfig;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum SchedulerCommand {
    CameOnline,
    ResetTimer,
    Shutdown,
}

/// Drives a [`SyncEngine`] from a timer and external events.
pub struct SyncScheduler<T: SyncTransport + 'static> {
    engine: Arc<SyncEngine<T>>,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    last_report: Arc<RwLock<Option<SyncReport>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport + 'static> SyncScheduler<T> {
    /// Spawns the trigger loop on the current tokio runtime.
    pub fn start(engine: Arc<SyncEngine<T>>, config: SchedulerConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let last_report = Arc::new(RwLock::new(None));
        let task = tokio::spawn(run_loop(
            Arc::clone(&engine),
            config,
            receiver,
            Arc::clone(&last_report),
        ));
        Self {
            engine,
            commands,
            last_report,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the driven engine.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.engine
    }

    /// Returns the report of the most recent completed cycle.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Signals that connectivity came back; a cycle starts promptly.
    pub fn notify_online(&self) {
        if self.commands.send(SchedulerCommand::CameOnline).is_err() {
            debug!("scheduler stopped; ignoring came-online event");
        }
    }

    /// Runs a cycle now and restarts the timer period.
    ///
    /// Returns `CycleBusy` without touching the timer if a cycle is already
    /// running; that cycle runs to completion.
    pub async fn force_sync(&self) -> SyncResult<SyncReport> {
        let report = self.engine.run_sync_cycle().await?;
        *self.last_report.write() = Some(report.clone());
        if self.commands.send(SchedulerCommand::ResetTimer).is_err() {
            debug!("scheduler stopped; timer not reset");
        }
        Ok(report)
    }

    /// Stops the trigger loop and waits for it to exit.
    pub async fn shutdown(&self) {
        if self.commands.send(SchedulerCommand::Shutdown).is_err() {
            debug!("scheduler loop already exited");
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}

async fn run_loop<T: SyncTransport + 'static>(
    engine: Arc<SyncEngine<T>>,
    config: SchedulerConfig,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    last_report: Arc<RwLock<Option<SyncReport>>>,
) {
    let period = config.interval.max(Duration::from_millis(1));
    let first = if config.sync_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = period.as_millis() as u64, "sync scheduler started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(SchedulerCommand::Shutdown) => break,
                Some(SchedulerCommand::CameOnline) => {
                    debug!("came online");
                    if run_once(&engine, &last_report, "online").await {
                        ticker.reset();
                    }
                }
                Some(SchedulerCommand::ResetTimer) => ticker.reset(),
            },
            _ = ticker.tick() => {
                run_once(&engine, &last_report, "timer").await;
            }
        }
    }
    info!("sync scheduler stopped");
}

/// Runs one cycle; returns whether it actually ran.
async fn run_once<T: SyncTransport + 'static>(
    engine: &SyncEngine<T>,
    last_report: &RwLock<Option<SyncReport>>,
    trigger: &'static str,
) -> bool {
    match engine.run_sync_cycle().await {
        Ok(report) => {
            *last_report.write() = Some(report);
            true
        }
        Err(SyncError::CycleBusy) => {
            debug!(trigger, "cycle already running");
            false
        }
        Err(e) => {
            warn!(trigger, error = %e, "sync cycle failed");
            false
        }
    }
}
