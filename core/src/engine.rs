//! The sentinel engine — orchestration for one database of tenants.
//!
//! SCAN ORDER (fixed):
//!   1. Take the tenant lock.
//!   2. Load the tenant's detection config (stored or defaults).
//!   3. Fetch the expense window from the snapshot provider.
//!   4. Detect, dedup and summarize.
//!   5. Reconcile findings into the review ledger (one transaction).
//!   6. Auto-alert if the tenant's pending-high count crossed its threshold.
//!
//! RULES:
//!   - Every operation opens its own connection, so tenants run in parallel.
//!   - Writes for one tenant are serialized by `TenantLocks`.
//!   - A scan returns a full `ScanReport` or one error, never half of one.

use crate::{
    alert::{AlertDispatcher, DispatchReport},
    clock::{Clock, Deadline, SystemClock},
    config::{ConfigRecord, DetectionConfig},
    detection::detect,
    error::{SentinelError, SentinelResult},
    expense::{AnalysisWindow, ExpenseRecord, ExpenseSnapshotProvider},
    finding::Finding,
    review::{
        BulkOutcome, BulkReviewAction, ReconcileSummary, ReviewAction, ReviewFilter, ReviewLedger,
        ReviewRecord, ReviewStats, TransitionOutcome,
    },
    scoring::FindingSummary,
    store::{NotificationLogRow, SentinelStore},
    tenant_lock::{TenantGuard, TenantLocks},
    types::{RecordId, TenantId},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{sync::Arc, thread, time::Duration};

/// Snapshot fetch attempts before a scan gives up.
pub const SNAPSHOT_ATTEMPTS: u32 = 3;
/// Reconcile attempts on a busy/locked database.
pub const RECONCILE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct ScanReport {
    pub tenant_id: TenantId,
    pub scanned_at: DateTime<Utc>,
    pub expense_count: usize,
    pub findings: Vec<Finding>,
    pub summary: FindingSummary,
    pub reconcile: ReconcileSummary,
    /// Present only when an automatic alert went out after this scan.
    pub alert: Option<DispatchReport>,
}

pub struct SentinelEngine {
    db_path: String,
    // Keeps a shared in-memory database alive between operations.
    anchor: Mutex<SentinelStore>,
    locks: TenantLocks,
    clock: Arc<dyn Clock>,
    snapshots: Arc<dyn ExpenseSnapshotProvider>,
    alerts: Option<AlertDispatcher>,
}

impl SentinelEngine {
    /// Open (and migrate) the database at `db_path`. File paths and
    /// SQLite URIs are both accepted.
    pub fn open(
        db_path: &str,
        snapshots: Arc<dyn ExpenseSnapshotProvider>,
        clock: Arc<dyn Clock>,
    ) -> SentinelResult<Self> {
        let anchor = SentinelStore::open(db_path)?;
        anchor.migrate()?;
        log::info!("sentinel engine opened on {db_path}");
        Ok(Self {
            db_path: db_path.to_string(),
            anchor: Mutex::new(anchor),
            locks: TenantLocks::new(),
            clock,
            snapshots,
            alerts: None,
        })
    }

    /// A named shared in-memory database that lives as long as the engine.
    pub fn in_memory(
        name: &str,
        snapshots: Arc<dyn ExpenseSnapshotProvider>,
        clock: Arc<dyn Clock>,
    ) -> SentinelResult<Self> {
        Self::open(&SentinelStore::shared_memory_uri(name), snapshots, clock)
    }

    /// Engine on the real wall clock.
    pub fn with_system_clock(
        db_path: &str,
        snapshots: Arc<dyn ExpenseSnapshotProvider>,
    ) -> SentinelResult<Self> {
        Self::open(db_path, snapshots, Arc::new(SystemClock))
    }

    pub fn with_alerting(mut self, dispatcher: AlertDispatcher) -> Self {
        self.alerts = Some(dispatcher);
        self
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// A fresh connection for one operation.
    pub fn store(&self) -> SentinelResult<SentinelStore> {
        self.anchor.lock().reopen()
    }

    // ── Configuration ──────────────────────────────────────────

    pub fn detection_config(&self, tenant_id: &str) -> SentinelResult<ConfigRecord> {
        self.store()?.detection_config(tenant_id)
    }

    pub fn update_detection_config(
        &self,
        tenant_id: &str,
        config: &DetectionConfig,
        actor_id: &str,
    ) -> SentinelResult<ConfigRecord> {
        let _guard = self.locks.acquire(tenant_id);
        let record = self
            .store()?
            .save_detection_config(tenant_id, config, actor_id, self.clock.now())?;
        log::info!(
            "tenant={tenant_id} detection config v{} saved by {actor_id}",
            record.version
        );
        Ok(record)
    }

    pub fn reset_detection_config(
        &self,
        tenant_id: &str,
        actor_id: &str,
    ) -> SentinelResult<ConfigRecord> {
        let _guard = self.locks.acquire(tenant_id);
        let record = self
            .store()?
            .reset_detection_config(tenant_id, actor_id, self.clock.now())?;
        log::info!("tenant={tenant_id} detection config reset by {actor_id}");
        Ok(record)
    }

    // ── Scan ───────────────────────────────────────────────────

    /// Detect over the tenant's expense window and reconcile the ledger.
    /// With a `timeout`, the whole scan-and-reconcile must finish in time
    /// or nothing is written and `Timeout` comes back.
    pub fn scan(
        &self,
        tenant_id: &str,
        window: AnalysisWindow,
        timeout: Option<Duration>,
    ) -> SentinelResult<ScanReport> {
        let deadline = Deadline::maybe("scan", timeout);
        let _guard = self.lock_tenant(tenant_id, deadline.as_ref())?;
        let now = self.clock.now();
        let store = self.store()?;

        let config = store.detection_config(tenant_id)?.config;
        let expenses = self.fetch_snapshot(tenant_id, window.since(now), deadline.as_ref())?;

        let findings = detect(&expenses, &config, now);
        let summary = FindingSummary::from_findings(&findings);
        log::debug!(
            "tenant={tenant_id} detection: {} expenses -> {} findings",
            expenses.len(),
            findings.len()
        );

        let reconcile = self.reconcile_with_retry(&store, tenant_id, &findings, deadline.as_ref())?;

        let alert = self.auto_alert(&store, tenant_id, &config, now);

        log::info!(
            "tenant={tenant_id} scan: {} expenses, {} findings, {} new reviews, {} existing, {} skipped",
            expenses.len(),
            summary.total,
            reconcile.created,
            reconcile.existing,
            reconcile.conflicts.len()
        );

        Ok(ScanReport {
            tenant_id: tenant_id.to_string(),
            scanned_at: now,
            expense_count: expenses.len(),
            findings,
            summary,
            reconcile,
            alert,
        })
    }

    /// Waiting for the tenant lock counts against the deadline.
    fn lock_tenant(
        &self,
        tenant_id: &str,
        deadline: Option<&Deadline>,
    ) -> SentinelResult<TenantGuard> {
        match deadline {
            None => Ok(self.locks.acquire(tenant_id)),
            Some(deadline) => self
                .locks
                .acquire_within(tenant_id, deadline.remaining())
                .ok_or_else(|| {
                    log::warn!("tenant={tenant_id} gave up waiting for the tenant lock");
                    deadline.timeout_error()
                }),
        }
    }

    fn fetch_snapshot(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
        deadline: Option<&Deadline>,
    ) -> SentinelResult<Vec<ExpenseRecord>> {
        let mut last_error = None;
        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            if let Some(deadline) = deadline {
                deadline.check()?;
            }
            match self.snapshots.expenses_since(tenant_id, since) {
                Ok(expenses) => return Ok(expenses),
                Err(e) => {
                    log::warn!(
                        "tenant={tenant_id} snapshot fetch attempt {attempt}/{SNAPSHOT_ATTEMPTS} failed: {e:#}"
                    );
                    last_error = Some(e);
                    if attempt < SNAPSHOT_ATTEMPTS {
                        thread::sleep(RETRY_BACKOFF * attempt);
                    }
                }
            }
        }
        Err(SentinelError::SnapshotUnavailable {
            reason: last_error
                .map(|e| format!("{e:#}"))
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    fn reconcile_with_retry(
        &self,
        store: &SentinelStore,
        tenant_id: &str,
        findings: &[Finding],
        deadline: Option<&Deadline>,
    ) -> SentinelResult<ReconcileSummary> {
        let ledger = ReviewLedger::new(store, tenant_id, self.clock.as_ref());
        let mut attempt = 1;
        loop {
            match ledger.reconcile(findings, deadline) {
                Err(e) if e.is_transient() && attempt < RECONCILE_ATTEMPTS => {
                    log::warn!(
                        "tenant={tenant_id} reconcile attempt {attempt}/{RECONCILE_ATTEMPTS} hit {e}, retrying"
                    );
                    thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Alert failures never fail the scan that triggered them.
    fn auto_alert(
        &self,
        store: &SentinelStore,
        tenant_id: &str,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> Option<DispatchReport> {
        let dispatcher = self.alerts.as_ref()?;
        if config.auto_alert_high_threshold == 0 {
            return None;
        }
        let result = store.review_stats(tenant_id).and_then(|stats| {
            if stats.high_pending < i64::from(config.auto_alert_high_threshold) {
                return Ok(None);
            }
            log::info!(
                "tenant={tenant_id} {} pending high findings reached auto-alert threshold {}",
                stats.high_pending,
                config.auto_alert_high_threshold
            );
            let records = store.review_records(tenant_id, ReviewFilter::pending_high())?;
            dispatcher.dispatch(store, tenant_id, &records, now, None).map(Some)
        });
        match result {
            Ok(report) => report,
            Err(e) => {
                log::warn!("tenant={tenant_id} auto-alert failed: {e}");
                None
            }
        }
    }

    // ── Review ledger ──────────────────────────────────────────

    pub fn review_records(
        &self,
        tenant_id: &str,
        filter: ReviewFilter,
    ) -> SentinelResult<Vec<ReviewRecord>> {
        self.store()?.review_records(tenant_id, filter)
    }

    pub fn review_record(&self, tenant_id: &str, record_id: &str) -> SentinelResult<ReviewRecord> {
        self.store()?
            .review_record(tenant_id, record_id)?
            .ok_or_else(|| SentinelError::RecordNotFound { record_id: record_id.to_string() })
    }

    pub fn review_stats(&self, tenant_id: &str) -> SentinelResult<ReviewStats> {
        self.store()?.review_stats(tenant_id)
    }

    pub fn transition(
        &self,
        tenant_id: &str,
        record_id: &str,
        action: ReviewAction,
        actor_id: &str,
        notes: Option<&str>,
    ) -> SentinelResult<TransitionOutcome> {
        let _guard = self.locks.acquire(tenant_id);
        let store = self.store()?;
        ReviewLedger::new(&store, tenant_id, self.clock.as_ref())
            .transition(record_id, action, actor_id, notes)
    }

    pub fn bulk_transition(
        &self,
        tenant_id: &str,
        record_ids: &[RecordId],
        action: BulkReviewAction,
        actor_id: &str,
        notes: Option<&str>,
    ) -> SentinelResult<BulkOutcome> {
        let _guard = self.locks.acquire(tenant_id);
        let store = self.store()?;
        ReviewLedger::new(&store, tenant_id, self.clock.as_ref())
            .bulk_transition(record_ids, action, actor_id, notes)
    }

    // ── Alerts ─────────────────────────────────────────────────

    /// Alert finance managers about the tenant's pending high findings now.
    pub fn dispatch_alerts(
        &self,
        tenant_id: &str,
        timeout: Option<Duration>,
    ) -> SentinelResult<DispatchReport> {
        let dispatcher = self
            .alerts
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("alerting is not configured for this engine"))?;
        let deadline = Deadline::maybe("alert dispatch", timeout);
        let store = self.store()?;
        let records = store.review_records(tenant_id, ReviewFilter::pending_high())?;
        dispatcher.dispatch(&store, tenant_id, &records, self.clock.now(), deadline.as_ref())
    }

    pub fn notification_log(&self, tenant_id: &str) -> SentinelResult<Vec<NotificationLogRow>> {
        self.store()?.notification_log(tenant_id)
    }
}
