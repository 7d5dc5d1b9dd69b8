//! Alert dispatcher — tells finance managers about pending high-severity
//! findings.
//!
//! One payload per dispatch, delivered to every recipient through an
//! `AlertSink` on at most `MAX_IN_FLIGHT_SENDS` worker threads. Every
//! attempt, successful or not, lands in `notification_log`.

use crate::{
    clock::Deadline,
    error::{SentinelError, SentinelResult},
    expense::ExpenseSummary,
    finding::{RuleType, Severity},
    review::{ReviewRecord, ReviewStatus},
    store::{NotificationLogRow, SentinelStore},
    types::{ExpenseId, RecordId, TenantId},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
};

/// Upper bound on concurrent deliveries for one dispatch.
pub const MAX_IN_FLIGHT_SENDS: usize = 8;

/// Failure reason recorded for recipients still outstanding at the deadline.
pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub user_id: String,
    pub name: String,
    /// Where the sink should send it, typically an email address.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertItem {
    pub record_id: RecordId,
    pub expense_id: ExpenseId,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub description: String,
    pub details: String,
    pub expense: ExpenseSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub tenant_id: TenantId,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<AlertItem>,
}

impl AlertPayload {
    pub fn subject(&self) -> String {
        match self.items.len() {
            1 => "1 high-severity expense finding needs review".to_string(),
            n => format!("{n} high-severity expense findings need review"),
        }
    }
}

/// Resolves who gets alerted for a tenant.
pub trait RecipientDirectory: Send + Sync {
    fn finance_managers(&self, tenant_id: &str) -> anyhow::Result<Vec<Recipient>>;
}

/// The transport. Implementations may block; each call runs on a worker thread.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, recipient: &Recipient, payload: &AlertPayload) -> anyhow::Result<()>;
}

/// A fixed recipient list, the same for every tenant.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipientDirectory {
    recipients: Vec<Recipient>,
}

impl StaticRecipientDirectory {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }
}

impl RecipientDirectory for StaticRecipientDirectory {
    fn finance_managers(&self, _tenant_id: &str) -> anyhow::Result<Vec<Recipient>> {
        Ok(self.recipients.clone())
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One `AlertDeliveryFailed` per failed recipient.
    pub failures: Vec<SentinelError>,
}

impl DispatchReport {
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }
}

pub struct AlertDispatcher {
    directory: Arc<dyn RecipientDirectory>,
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(directory: Arc<dyn RecipientDirectory>, sink: Arc<dyn AlertSink>) -> Self {
        Self { directory, sink }
    }

    /// Alert every finance manager of `tenant_id` about the pending
    /// high-severity records among `records`.
    ///
    /// No such records means nothing is sent and the report is all zeros.
    /// If `deadline` passes mid fan-out, outstanding recipients are logged
    /// as failed and `Timeout` is returned. A send already in flight at the
    /// deadline is not interrupted, so a recipient logged as
    /// "deadline exceeded" may still have received the alert.
    pub fn dispatch(
        &self,
        store: &SentinelStore,
        tenant_id: &str,
        records: &[ReviewRecord],
        now: DateTime<Utc>,
        deadline: Option<&Deadline>,
    ) -> SentinelResult<DispatchReport> {
        let items: Vec<AlertItem> = records
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending && r.severity == Severity::High)
            .map(|r| AlertItem {
                record_id: r.id.clone(),
                expense_id: r.expense_id.clone(),
                rule_type: r.rule_type,
                severity: r.severity,
                description: r.description.clone(),
                details: r.details.clone(),
                expense: r.expense.clone(),
            })
            .collect();
        if items.is_empty() {
            log::debug!("tenant={tenant_id} no pending high findings, nothing to alert");
            return Ok(DispatchReport::default());
        }

        let recipients = self.directory.finance_managers(tenant_id)?;
        if recipients.is_empty() {
            log::warn!(
                "tenant={tenant_id} {} pending high findings but no finance managers to alert",
                items.len()
            );
            return Ok(DispatchReport::default());
        }

        let payload = AlertPayload { tenant_id: tenant_id.to_string(), generated_at: now, items };
        let payload_json = serde_json::to_string(&payload)?;
        let finding_count = payload.items.len() as i64;

        let outcomes = self.fan_out(recipients.clone(), Arc::new(payload), deadline);

        let mut report = DispatchReport::default();
        let mut timed_out = false;
        for (recipient, outcome) in recipients.iter().zip(outcomes) {
            report.attempted += 1;
            let failure_reason = match outcome {
                Some(Ok(())) => {
                    report.succeeded += 1;
                    None
                }
                Some(Err(e)) => Some(e.to_string()),
                None => {
                    timed_out = true;
                    Some(DEADLINE_EXCEEDED.to_string())
                }
            };
            if let Some(reason) = &failure_reason {
                report.failed += 1;
                log::warn!(
                    "tenant={tenant_id} alert to {} <{}> failed: {reason}",
                    recipient.user_id,
                    recipient.address
                );
                report.failures.push(SentinelError::AlertDeliveryFailed {
                    recipient_id: recipient.user_id.clone(),
                    reason: reason.clone(),
                });
            }
            store.insert_notification_log(&NotificationLogRow {
                notification_id: uuid::Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                recipient_id: recipient.user_id.clone(),
                recipient_address: recipient.address.clone(),
                status: if failure_reason.is_none() { "sent" } else { "failed" }.to_string(),
                failure_reason,
                finding_count,
                payload: payload_json.clone(),
                created_at: now,
            })?;
        }

        log::info!(
            "tenant={tenant_id} alert dispatch: {} attempted, {} sent, {} failed",
            report.attempted,
            report.succeeded,
            report.failed
        );

        match deadline {
            Some(deadline) if timed_out => Err(deadline.timeout_error()),
            _ => Ok(report),
        }
    }

    /// Deliver to every recipient with bounded concurrency. The result
    /// at index `i` belongs to `recipients[i]`; `None` means the deadline
    /// passed before that delivery finished.
    fn fan_out(
        &self,
        recipients: Vec<Recipient>,
        payload: Arc<AlertPayload>,
        deadline: Option<&Deadline>,
    ) -> Vec<Option<anyhow::Result<()>>> {
        let total = recipients.len();
        let queue: Arc<Mutex<VecDeque<(usize, Recipient)>>> =
            Arc::new(Mutex::new(recipients.into_iter().enumerate().collect()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(usize, anyhow::Result<()>)>();

        for _ in 0..total.min(MAX_IN_FLIGHT_SENDS) {
            let queue = Arc::clone(&queue);
            let cancelled = Arc::clone(&cancelled);
            let sink = Arc::clone(&self.sink);
            let payload = Arc::clone(&payload);
            let tx = tx.clone();
            thread::spawn(move || loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let Some((idx, recipient)) = queue.lock().pop_front() else {
                    break;
                };
                let result = sink.deliver(&recipient, &payload);
                if tx.send((idx, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut results: Vec<Option<anyhow::Result<()>>> = (0..total).map(|_| None).collect();
        let mut received = 0;
        while received < total {
            let next = match deadline {
                Some(deadline) => rx.recv_timeout(deadline.remaining()).ok(),
                None => rx.recv().ok(),
            };
            match next {
                Some((idx, result)) => {
                    results[idx] = Some(result);
                    received += 1;
                }
                None => {
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        results
    }
}
