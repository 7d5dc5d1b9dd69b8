//! Review ledger — triage state for every finding.
//!
//! Lifecycle:
//!   - A row is created `Pending` the first time a scan emits a finding
//!     for its (expense, rule type) pair. Creation is create-if-absent.
//!   - Reviewers move it to `Reviewed`, `Dismissed` or `Escalated`.
//!     Those are terminal here; reopening is an administrative action
//!     outside this crate.
//!   - Later scans never revert, close or delete a row.
//!
//! Every applied transition writes exactly one audit entry in the same
//! SQLite transaction as the status change. If the audit insert fails
//! the status change still commits and the failure comes back as an
//! `AuditWriteFailed` warning.

use crate::{
    audit::AuditEntry,
    clock::{Clock, Deadline},
    error::{SentinelError, SentinelResult},
    expense::ExpenseSummary,
    finding::{Finding, RuleType, Severity},
    store::SentinelStore,
    types::{ActorId, ExpenseId, RecordId, TenantId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Create-if-absent attempts per finding before the pair is skipped.
const CREATE_ATTEMPTS: usize = 2;

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Reviewed,
    Dismissed,
    Escalated,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Pending,
        ReviewStatus::Reviewed,
        ReviewStatus::Dismissed,
        ReviewStatus::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Reviewed => "reviewed",
            ReviewStatus::Dismissed => "dismissed",
            ReviewStatus::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        TRANSITIONS.iter().all(|(from, _, _)| from != self)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reviewer can do to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    MarkReviewed,
    Dismiss,
    Escalate,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::MarkReviewed => "mark_reviewed",
            ReviewAction::Dismiss => "dismiss",
            ReviewAction::Escalate => "escalate",
        }
    }
}

/// The subset of actions allowed in bulk. Escalation is always one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkReviewAction {
    MarkReviewed,
    Dismiss,
}

impl From<BulkReviewAction> for ReviewAction {
    fn from(action: BulkReviewAction) -> Self {
        match action {
            BulkReviewAction::MarkReviewed => ReviewAction::MarkReviewed,
            BulkReviewAction::Dismiss => ReviewAction::Dismiss,
        }
    }
}

/// The complete transition table. Anything not listed is rejected.
const TRANSITIONS: [(ReviewStatus, ReviewAction, ReviewStatus); 3] = [
    (ReviewStatus::Pending, ReviewAction::MarkReviewed, ReviewStatus::Reviewed),
    (ReviewStatus::Pending, ReviewAction::Dismiss, ReviewStatus::Dismissed),
    (ReviewStatus::Pending, ReviewAction::Escalate, ReviewStatus::Escalated),
];

/// Where `action` takes a record in status `from`, if anywhere.
pub fn next_status(from: ReviewStatus, action: ReviewAction) -> Option<ReviewStatus> {
    TRANSITIONS
        .iter()
        .find(|(f, a, _)| *f == from && *a == action)
        .map(|(_, _, to)| *to)
}

/// Every applied review must name who did it.
fn require_actor(actor_id: &str, action: ReviewAction) -> SentinelResult<()> {
    if actor_id.trim().is_empty() {
        return Err(SentinelError::ActorRequired { action: action.as_str() });
    }
    Ok(())
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub status: ReviewStatus,
    pub description: String,
    pub details: String,
    pub reviewed_by: Option<ActorId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub expense: ExpenseSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewFilter {
    pub status: Option<ReviewStatus>,
    pub severity: Option<Severity>,
}

impl ReviewFilter {
    pub fn pending_high() -> Self {
        Self { status: Some(ReviewStatus::Pending), severity: Some(Severity::High) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewStats {
    pub by_status: BTreeMap<ReviewStatus, i64>,
    pub high_pending: i64,
}

impl ReviewStats {
    pub fn count(&self, status: ReviewStatus) -> i64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.by_status.values().sum()
    }
}

/// Result of one create-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Existing,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub created: usize,
    pub existing: usize,
    /// Pairs skipped after a create-if-absent conflict survived a retry.
    pub conflicts: Vec<SentinelError>,
}

#[derive(Debug)]
pub struct TransitionOutcome {
    pub record: ReviewRecord,
    pub audit_warning: Option<SentinelError>,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub updated: Vec<RecordId>,
    /// Ids that were not pending (or not found) and were left alone.
    pub skipped: Vec<RecordId>,
    pub audit_warnings: Vec<SentinelError>,
}

impl BulkOutcome {
    pub fn succeeded(&self) -> usize {
        self.updated.len()
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// The review ledger for one tenant, over one store connection.
/// Callers hold the tenant's lock for the ledger's lifetime.
pub struct ReviewLedger<'a> {
    store: &'a SentinelStore,
    tenant_id: &'a str,
    clock: &'a dyn Clock,
}

impl<'a> ReviewLedger<'a> {
    pub fn new(store: &'a SentinelStore, tenant_id: &'a str, clock: &'a dyn Clock) -> Self {
        Self { store, tenant_id, clock }
    }

    /// Create a pending record for every finding without one.
    /// All-or-nothing: if `deadline` passes first, nothing is written.
    pub fn reconcile(
        &self,
        findings: &[Finding],
        deadline: Option<&Deadline>,
    ) -> SentinelResult<ReconcileSummary> {
        let now = self.clock.now();
        self.store.transaction(|store| {
            let mut summary = ReconcileSummary::default();
            for finding in findings {
                if let Some(deadline) = deadline {
                    deadline.check()?;
                }
                match self.create_with_retry(store, finding, now)? {
                    Some(CreateOutcome::Created) => summary.created += 1,
                    Some(CreateOutcome::Existing) => summary.existing += 1,
                    None => summary.conflicts.push(SentinelError::LedgerConflict {
                        expense_id: finding.expense_id.clone(),
                        rule_type: finding.rule_type,
                    }),
                }
            }
            if let Some(deadline) = deadline {
                deadline.check()?;
            }
            Ok(summary)
        })
    }

    /// `None` means the pair is skipped: both attempts hit a conflict and
    /// a fresh read still found no row.
    fn create_with_retry(
        &self,
        store: &SentinelStore,
        finding: &Finding,
        now: DateTime<Utc>,
    ) -> SentinelResult<Option<CreateOutcome>> {
        for attempt in 1..=CREATE_ATTEMPTS {
            let result = store.savepoint("create_review", |s| {
                s.create_review_if_absent(self.tenant_id, finding, now)
            });
            match result {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) if e.is_constraint_violation() => {
                    log::warn!(
                        "tenant={} review create conflict on ({}, {}) attempt {attempt}: {e}",
                        self.tenant_id,
                        finding.expense_id,
                        finding.rule_type
                    );
                    if store
                        .review_record_for_pair(self.tenant_id, &finding.expense_id, finding.rule_type)?
                        .is_some()
                    {
                        return Ok(Some(CreateOutcome::Existing));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Apply `action` to a single record.
    pub fn transition(
        &self,
        record_id: &str,
        action: ReviewAction,
        actor_id: &str,
        notes: Option<&str>,
    ) -> SentinelResult<TransitionOutcome> {
        require_actor(actor_id, action)?;
        let now = self.clock.now();
        self.store.transaction(|store| {
            let record = store
                .review_record(self.tenant_id, record_id)?
                .ok_or_else(|| SentinelError::RecordNotFound { record_id: record_id.to_string() })?;
            let to = next_status(record.status, action).ok_or_else(|| {
                SentinelError::TransitionRejected {
                    record_id: record_id.to_string(),
                    status: record.status,
                }
            })?;

            let updated = store.update_review_status(
                self.tenant_id,
                record_id,
                record.status,
                to,
                actor_id,
                notes,
                now,
            )?;
            if !updated {
                // Lost a race to another writer between read and update.
                let current = store
                    .review_record(self.tenant_id, record_id)?
                    .map(|r| r.status)
                    .unwrap_or(record.status);
                return Err(SentinelError::TransitionRejected {
                    record_id: record_id.to_string(),
                    status: current,
                });
            }

            let entry = AuditEntry::review_transition(
                self.tenant_id,
                record_id,
                actor_id,
                record.status,
                to,
                notes,
                false,
                now,
            );
            let audit_warning = self.write_audit(store, &entry);

            let record = store
                .review_record(self.tenant_id, record_id)?
                .ok_or_else(|| SentinelError::RecordNotFound { record_id: record_id.to_string() })?;
            log::info!(
                "tenant={} review {record_id}: {} -> {to} by {actor_id}",
                self.tenant_id,
                entry.from_status().unwrap_or_default()
            );
            Ok(TransitionOutcome { record, audit_warning })
        })
    }

    /// Apply `action` to every currently pending record in `record_ids`,
    /// one transaction per record. Non-pending and unknown ids are skipped.
    pub fn bulk_transition(
        &self,
        record_ids: &[RecordId],
        action: BulkReviewAction,
        actor_id: &str,
        notes: Option<&str>,
    ) -> SentinelResult<BulkOutcome> {
        let action = ReviewAction::from(action);
        require_actor(actor_id, action)?;
        let now = self.clock.now();
        let to = next_status(ReviewStatus::Pending, action)
            .ok_or_else(|| anyhow::anyhow!("bulk action {} has no pending transition", action.as_str()))?;

        let mut outcome = BulkOutcome::default();
        for record_id in record_ids {
            let applied = self.store.transaction(|store| {
                let updated = store.update_review_status(
                    self.tenant_id,
                    record_id,
                    ReviewStatus::Pending,
                    to,
                    actor_id,
                    notes,
                    now,
                )?;
                if !updated {
                    return Ok(None);
                }
                let entry = AuditEntry::review_transition(
                    self.tenant_id,
                    record_id,
                    actor_id,
                    ReviewStatus::Pending,
                    to,
                    notes,
                    true,
                    now,
                );
                Ok(Some(self.write_audit(store, &entry)))
            })?;
            match applied {
                Some(warning) => {
                    outcome.updated.push(record_id.clone());
                    outcome.audit_warnings.extend(warning);
                }
                None => outcome.skipped.push(record_id.clone()),
            }
        }

        log::info!(
            "tenant={} bulk {}: {} updated, {} skipped by {actor_id}",
            self.tenant_id,
            action.as_str(),
            outcome.updated.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Audit failures are warnings: roll back the audit savepoint only.
    fn write_audit(&self, store: &SentinelStore, entry: &AuditEntry) -> Option<SentinelError> {
        match store.savepoint("audit", |s| s.append_audit_entry(entry)) {
            Ok(()) => None,
            Err(e) => {
                log::warn!(
                    "tenant={} audit write failed for review {}: {e}",
                    self.tenant_id,
                    entry.record_id
                );
                Some(SentinelError::AuditWriteFailed {
                    record_id: entry.record_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn records(&self, filter: ReviewFilter) -> SentinelResult<Vec<ReviewRecord>> {
        self.store.review_records(self.tenant_id, filter)
    }

    pub fn stats(&self) -> SentinelResult<ReviewStats> {
        self.store.review_stats(self.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_has_outgoing_transitions() {
        assert!(!ReviewStatus::Pending.is_terminal());
        assert!(ReviewStatus::Reviewed.is_terminal());
        assert!(ReviewStatus::Dismissed.is_terminal());
        assert!(ReviewStatus::Escalated.is_terminal());
    }

    #[test]
    fn transition_table() {
        use ReviewAction::*;
        use ReviewStatus::*;
        assert_eq!(next_status(Pending, MarkReviewed), Some(Reviewed));
        assert_eq!(next_status(Pending, Dismiss), Some(Dismissed));
        assert_eq!(next_status(Pending, Escalate), Some(Escalated));
        for from in [Reviewed, Dismissed, Escalated] {
            for action in [MarkReviewed, Dismiss, Escalate] {
                assert_eq!(next_status(from, action), None, "{from} + {action:?}");
            }
        }
    }

    #[test]
    fn bulk_actions_map_to_pending_transitions() {
        for bulk in [BulkReviewAction::MarkReviewed, BulkReviewAction::Dismiss] {
            assert!(next_status(ReviewStatus::Pending, bulk.into()).is_some());
        }
    }
}
