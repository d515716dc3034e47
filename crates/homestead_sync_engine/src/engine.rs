//! Sync cycle engine.

use crate::config::SyncConfig;
use crate::conflicts::{ConflictResolver, ConflictStore};
use crate::error::{SyncError, SyncResult};
use crate::meta::SyncMeta;
use crate::outbox::Outbox;
use crate::transport::SyncTransport;
use homestead_store::StoreHandle;
use homestead_sync_protocol::collections::is_reserved;
use homestead_sync_protocol::{
    collapse, decide_remote, now_millis, ConflictLog, Credentials, HandshakeRequest, Operation,
    PullRequest, PushRejection, PushRequest, PushRow, QueueStatus, Record, RejectionKind,
    RemoteDecision, RemoteRow, Resolution, RowKey, SyncQueueItem, SyncStatus, PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is connecting to the replica.
    Connecting,
    /// Engine is pushing local changes.
    Pushing,
    /// Engine is pulling remote changes.
    Pulling,
    /// The last cycle completed without transport errors.
    Synced,
    /// The last cycle recorded an error.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pushing | SyncState::Pulling
        )
    }
}

/// Statistics accumulated across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of records pushed.
    pub records_pushed: u64,
    /// Total number of remote rows applied.
    pub records_pulled: u64,
    /// Total number of conflicts detected.
    pub conflicts_detected: u64,
    /// Last cycle end time (Unix millis).
    pub last_sync_at: Option<i64>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Items acknowledged by the replica.
    pub pushed: u64,
    /// Remote rows applied locally.
    pub pulled: u64,
    /// Conflicts newly detected.
    pub conflicts: u64,
    /// Items that moved to `failed` during this cycle.
    pub failed: u64,
    /// Items scheduled for another attempt.
    pub retried: u64,
    /// Items the replica rejected as stale.
    pub stale: u64,
    /// Superseded items marked done by collapsing.
    pub superseded: u64,
    /// Items held back by an unresolved conflict.
    pub suspended: u64,
    /// Remote rows left untouched.
    pub skipped: u64,
    /// Transport and row errors recorded during the cycle.
    pub errors: Vec<String>,
    /// Whether the cycle completed without transport errors.
    pub success: bool,
    /// Duration of the cycle.
    pub duration: Duration,
}

enum RowOutcome {
    Applied,
    Skipped,
    Conflict { created: bool },
}

/// Runs push-then-pull cycles against a remote replica.
///
/// At most one cycle runs at a time; a concurrent call returns
/// [`SyncError::CycleBusy`]. Transport failures never escape a cycle: they
/// are recorded on outbox items, in the [`SyncReport`] and in
/// [`SyncEngine::stats`].
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    handle: StoreHandle,
    outbox: Outbox,
    meta: SyncMeta,
    conflicts: ConflictStore,
    resolver: ConflictResolver,
    cycle: tokio::sync::Mutex<()>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: Arc<T>, handle: StoreHandle) -> Self {
        Self {
            config,
            transport,
            outbox: Outbox::new(handle.clone()),
            meta: SyncMeta::new(handle.clone()),
            conflicts: ConflictStore::new(handle.clone()),
            resolver: ConflictResolver::new(handle.clone()),
            handle,
            cycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the accumulated stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the outbox.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Returns the conflict store.
    pub fn conflicts(&self) -> &ConflictStore {
        &self.conflicts
    }

    /// Returns the sync bookkeeping.
    pub fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    /// Returns the store handle.
    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Resolves a conflict. See [`ConflictResolver::resolve_conflict`].
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> SyncResult<ConflictLog> {
        self.resolver.resolve_conflict(conflict_id, resolution)
    }

    /// Repairs the outbox after a crash. Returns how many items changed.
    ///
    /// Items left `processing` go back to `pending`, and `pending` records
    /// whose queue entry was never written get one. Returns `CycleBusy`
    /// while a cycle is running.
    pub fn recover(&self) -> SyncResult<usize> {
        let _guard = self.cycle.try_lock().map_err(|_| SyncError::CycleBusy)?;
        let in_flight = self.outbox.recover_in_flight()?;
        let orphans = self.outbox.requeue_orphans()?;
        if in_flight + orphans > 0 {
            info!(in_flight, orphans, "recovered outbox items");
        }
        Ok(in_flight + orphans)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            owner: self.config.owner.clone(),
            token: self.config.token.clone(),
        }
    }

    async fn call<R, F>(&self, fut: F) -> SyncResult<R>
    where
        F: Future<Output = SyncResult<R>>,
    {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    /// Runs one push-then-pull cycle.
    ///
    /// # Errors
    ///
    /// Returns `CycleBusy` if another cycle is running, and store errors.
    /// Transport failures are reported in the returned [`SyncReport`].
    pub async fn run_sync_cycle(&self) -> SyncResult<SyncReport> {
        let _guard = self.cycle.try_lock().map_err(|_| SyncError::CycleBusy)?;
        let start = Instant::now();
        let mut report = SyncReport::default();

        info!(device = %self.config.device_id, "sync cycle started");
        let outcome = self.cycle_inner(&mut report).await;
        report.duration = start.elapsed();

        match outcome {
            Ok(()) => {
                report.success = report.errors.is_empty();
                self.set_state(if report.success {
                    SyncState::Synced
                } else {
                    SyncState::Error
                });
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(e.to_string());
                return Err(e);
            }
        }

        if self.config.compact_after_cycle {
            self.outbox.compact()?;
        }

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pushed += report.pushed;
            stats.records_pulled += report.pulled;
            stats.conflicts_detected += report.conflicts;
            stats.last_sync_at = Some(now_millis());
            stats.last_error = report.errors.last().cloned();
        }

        info!(
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts = report.conflicts,
            failed = report.failed,
            errors = report.errors.len(),
            duration_ms = report.duration.as_millis() as u64,
            "sync cycle finished"
        );
        Ok(report)
    }

    async fn cycle_inner(&self, report: &mut SyncReport) -> SyncResult<()> {
        self.set_state(SyncState::Connecting);
        if let Err(e) = self.handshake().await {
            warn!(error = %e, "handshake failed");
            report.errors.push(e.to_string());
            return Ok(());
        }

        self.set_state(SyncState::Pushing);
        if let Err(e) = self.push_phase(report).await {
            match e {
                SyncError::Store(_) | SyncError::Record(_) => return Err(e),
                other => {
                    warn!(error = %other, "push phase aborted");
                    report.errors.push(other.to_string());
                    return Ok(());
                }
            }
        }

        self.set_state(SyncState::Pulling);
        if let Err(e) = self.pull_phase(report).await {
            match e {
                SyncError::Store(_) => return Err(e),
                other => {
                    warn!(error = %other, "pull phase aborted");
                    report.errors.push(other.to_string());
                }
            }
        }
        Ok(())
    }

    async fn handshake(&self) -> SyncResult<()> {
        let request = HandshakeRequest {
            device_id: self.config.device_id.clone(),
            credentials: self.credentials(),
            protocol_version: PROTOCOL_VERSION,
        };
        let response = self.call(self.transport.handshake(&request)).await?;
        if !response.success {
            let message = response.error.unwrap_or_else(|| "handshake failed".into());
            return Err(if message.contains("auth") || message.contains("token") {
                SyncError::AuthenticationFailed(message)
            } else {
                SyncError::ServerError(message)
            });
        }
        Ok(())
    }

    /// Collapses the outbox and uploads due items in batches.
    async fn push_phase(&self, report: &mut SyncReport) -> SyncResult<()> {
        let now = now_millis();
        let outstanding: Vec<SyncQueueItem> = self
            .outbox
            .list()?
            .into_iter()
            .filter(|i| i.status.is_outstanding())
            .collect();

        let (latest, superseded) = collapse(outstanding);
        for item in superseded {
            self.outbox.update_item(&item, |i| {
                if i.status.is_outstanding() {
                    i.status = QueueStatus::Done;
                    i.error = Some("superseded".into());
                }
            })?;
            report.superseded += 1;
        }

        let mut due = Vec::new();
        for item in latest {
            if !item.is_due(now) {
                continue;
            }
            if self.conflicts.is_conflicted(&item.store_name, &item.payload_ref)? {
                debug!(store = %item.store_name, id = %item.payload_ref, "held back by conflict");
                report.suspended += 1;
                continue;
            }
            due.push(item);
        }

        for batch in due.chunks(self.config.push_batch_size.max(1)) {
            self.push_batch(batch, report).await?;
        }
        Ok(())
    }

    async fn push_batch(&self, batch: &[SyncQueueItem], report: &mut SyncReport) -> SyncResult<()> {
        let mut claimed: HashMap<RowKey, (SyncQueueItem, PushRow)> = HashMap::new();
        let mut rows = Vec::with_capacity(batch.len());

        for item in batch {
            let claimed_item = self
                .outbox
                .update_item(item, |i| i.status = QueueStatus::Processing)?;
            let Some(item) = claimed_item else {
                continue;
            };
            let row = self.build_row(&item)?;
            rows.push(row.clone());
            claimed.insert(row.key(), (item, row));
        }
        if rows.is_empty() {
            return Ok(());
        }

        let request = PushRequest {
            credentials: self.credentials(),
            rows,
        };
        let response = match self.call(self.transport.push(&request)).await {
            Ok(response) => response,
            Err(e) => {
                for (item, _) in claimed.values() {
                    self.fail_attempt(item, &e, report)?;
                }
                return Err(e);
            }
        };

        for key in &response.accepted {
            let Some((item, row)) = claimed.remove(key) else {
                continue;
            };
            self.acknowledge(&item, &row)?;
            report.pushed += 1;
        }

        for rejection in &response.rejected {
            let Some((item, _)) = claimed.remove(&rejection.key) else {
                continue;
            };
            match rejection.kind {
                RejectionKind::Stale => {
                    debug!(
                        key = %rejection.key,
                        reason = %rejection.reason,
                        "push rejected as stale"
                    );
                    report.stale += 1;
                    self.handle_stale(&item, rejection, report)?;
                }
                RejectionKind::Invalid => {
                    warn!(
                        key = %rejection.key,
                        reason = %rejection.reason,
                        "push rejected permanently"
                    );
                    self.outbox.update_item(&item, |i| {
                        i.status = QueueStatus::Failed;
                        i.error = Some(rejection.reason.clone());
                    })?;
                    report.failed += 1;
                }
            }
        }

        // Rows the replica neither accepted nor rejected.
        let missing = SyncError::ServerError("row not acknowledged".into());
        for (item, _) in claimed.values() {
            self.fail_attempt(item, &missing, report)?;
        }
        Ok(())
    }

    /// Turns a stale rejection into a conflict against the replica's version.
    ///
    /// Without a usable version the rejection counts as a failed attempt, so
    /// an item the replica keeps refusing ends up `failed`.
    fn handle_stale(
        &self,
        item: &SyncQueueItem,
        rejection: &PushRejection,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let recorded = match &rejection.current {
            Some(current) => match self.record_stale(item, current) {
                Ok(created) => Some(created),
                Err(SyncError::Record(e)) => {
                    warn!(
                        key = %rejection.key,
                        error = %e,
                        "stale rejection carried a malformed row"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        match recorded {
            Some(created) => {
                if created {
                    report.conflicts += 1;
                }
                self.outbox.update_item(item, |i| {
                    i.status = QueueStatus::Pending;
                    i.error = Some(format!("stale: {}", rejection.reason));
                })?;
                Ok(())
            }
            None => self.fail_attempt(item, &SyncError::Stale(rejection.reason.clone()), report),
        }
    }

    fn record_stale(&self, item: &SyncQueueItem, current: &RemoteRow) -> SyncResult<bool> {
        let remote = remote_record(current)?;
        let (store_name, id) = (&item.store_name, &item.payload_ref);
        self.handle.with_lock(store_name, id, || -> SyncResult<bool> {
            let local = match item.operation {
                Operation::Put => self.handle.store().get(store_name, id)?,
                Operation::Delete => None,
            };
            let (_, created) =
                self.conflicts
                    .record(store_name, id, local, remote, current.updated_at)?;
            Ok(created)
        })
    }

    fn build_row(&self, item: &SyncQueueItem) -> SyncResult<PushRow> {
        let base_updated_at = self.meta.last_synced(&item.store_name, &item.payload_ref)?;
        let current = match item.operation {
            Operation::Put => self.handle.get(&item.store_name, &item.payload_ref)?,
            Operation::Delete => None,
        };
        Ok(match current {
            Some(record) => PushRow {
                collection: item.store_name.clone(),
                id: item.payload_ref.clone(),
                data: Some(record.to_blob()?),
                updated_at: record.updated_at,
                deleted: false,
                base_updated_at,
            },
            None => PushRow {
                collection: item.store_name.clone(),
                id: item.payload_ref.clone(),
                data: None,
                updated_at: item.timestamp,
                deleted: true,
                base_updated_at,
            },
        })
    }

    fn acknowledge(&self, item: &SyncQueueItem, row: &PushRow) -> SyncResult<()> {
        self.outbox.update_item(item, |i| {
            i.status = QueueStatus::Done;
            i.error = None;
            i.next_attempt_at = None;
        })?;

        if !row.deleted {
            // A newer local write keeps the record pending.
            self.handle.update(&row.collection, &row.id, |current| {
                Ok(current
                    .filter(|r| {
                        r.updated_at == row.updated_at && r.sync_status == SyncStatus::Pending
                    })
                    .map(|r| r.with_status(SyncStatus::Synced)))
            })?;
        }
        self.meta.set_last_synced(&row.collection, &row.id, row.updated_at)?;
        debug!(key = %row.key(), updated_at = row.updated_at, "push acknowledged");
        Ok(())
    }

    fn fail_attempt(
        &self,
        item: &SyncQueueItem,
        error: &SyncError,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let retry = &self.config.retry;
        let now = now_millis();
        let permanent = error.is_permanent();
        let updated = self.outbox.update_item(item, |i| {
            i.error = Some(error.to_string());
            if permanent {
                i.status = QueueStatus::Failed;
                return;
            }
            i.attempts += 1;
            if retry.exhausted(i.attempts) {
                i.status = QueueStatus::Failed;
                i.next_attempt_at = None;
            } else {
                let delay = retry.delay_for_attempt(i.attempts);
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                i.status = QueueStatus::Pending;
                i.next_attempt_at = Some(now.saturating_add(delay_ms));
            }
        })?;

        match updated.map(|i| i.status) {
            Some(QueueStatus::Failed) => {
                warn!(
                    item = %item.id,
                    store = %item.store_name,
                    id = %item.payload_ref,
                    error = %error,
                    "outbox item failed"
                );
                report.failed += 1;
            }
            Some(_) => report.retried += 1,
            None => {}
        }
        Ok(())
    }

    /// Fetches pages after the cursor and applies them.
    async fn pull_phase(&self, report: &mut SyncReport) -> SyncResult<()> {
        loop {
            let cursor = self.meta.cursor()?;
            let request = PullRequest {
                credentials: self.credentials(),
                cursor,
                limit: self.config.pull_batch_size,
            };
            let page = self.call(self.transport.pull(&request)).await?;
            debug!(cursor, rows = page.rows.len(), has_more = page.has_more, "pulled page");

            for row in &page.rows {
                match self.apply_remote_row(row) {
                    Ok(RowOutcome::Applied) => report.pulled += 1,
                    Ok(RowOutcome::Skipped) => report.skipped += 1,
                    Ok(RowOutcome::Conflict { created }) => {
                        if created {
                            report.conflicts += 1;
                        }
                    }
                    Err(SyncError::Record(e)) => {
                        warn!(key = %row.key(), error = %e, "skipping malformed remote row");
                        report.errors.push(format!("{}: {e}", row.key()));
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            if page.cursor > cursor {
                self.meta.set_cursor(page.cursor)?;
            }
            if !page.has_more || page.cursor <= cursor {
                break;
            }
        }
        Ok(())
    }

    /// Applies one remote row. Idempotent.
    fn apply_remote_row(&self, row: &RemoteRow) -> SyncResult<RowOutcome> {
        if is_reserved(&row.collection) {
            return Ok(RowOutcome::Skipped);
        }

        let remote = remote_record(row)?;

        self.handle.with_lock(&row.collection, &row.id, || -> SyncResult<RowOutcome> {
            let store = self.handle.store();
            let local = store.get(&row.collection, &row.id)?;

            if self.conflicts.is_conflicted(&row.collection, &row.id)? {
                self.conflicts
                    .record(&row.collection, &row.id, local, remote.clone(), row.updated_at)?;
                return Ok(RowOutcome::Conflict { created: false });
            }

            let outstanding = self.outbox.outstanding_operation(&row.collection, &row.id)?;
            let last_synced = self.meta.last_synced(&row.collection, &row.id)?;

            let decision =
                decide_remote(local.as_ref(), outstanding.is_some(), last_synced, row.updated_at);
            match decision {
                RemoteDecision::Apply => {
                    match &remote {
                        Some(record) => store.put(&row.collection, record.clone())?,
                        None => {
                            if !store.delete(&row.collection, &row.id)? {
                                // Tombstone for a record this device never held.
                                self.meta
                                    .set_last_synced(&row.collection, &row.id, row.updated_at)?;
                                return Ok(RowOutcome::Skipped);
                            }
                        }
                    }
                    self.meta.set_last_synced(&row.collection, &row.id, row.updated_at)?;
                    debug!(
                        key = %row.key(),
                        updated_at = row.updated_at,
                        deleted = row.deleted,
                        "applied remote row"
                    );
                    Ok(RowOutcome::Applied)
                }
                RemoteDecision::Skip => {
                    if local.as_ref().is_some_and(|l| {
                        l.sync_status == SyncStatus::Synced && l.updated_at == row.updated_at
                    }) {
                        self.meta.set_last_synced(&row.collection, &row.id, row.updated_at)?;
                    }
                    Ok(RowOutcome::Skipped)
                }
                RemoteDecision::Conflict => {
                    let local_version = match outstanding {
                        Some(Operation::Delete) => None,
                        _ => local,
                    };
                    let (_, created) = self.conflicts.record(
                        &row.collection,
                        &row.id,
                        local_version,
                        remote.clone(),
                        row.updated_at,
                    )?;
                    Ok(RowOutcome::Conflict { created })
                }
            }
        })
    }
}

/// Decodes a remote row into the record it carries; `None` for a tombstone.
fn remote_record(row: &RemoteRow) -> SyncResult<Option<Record>> {
    match (&row.data, row.deleted) {
        (Some(data), false) => {
            let mut record = Record::from_blob(data)?;
            record.id = row.id.clone();
            record.updated_at = row.updated_at;
            record.sync_status = SyncStatus::Synced;
            Ok(Some(record))
        }
        _ => Ok(None),
    }
}
