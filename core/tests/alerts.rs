//! Alert dispatch: fan-out, failure aggregation, notification log,
//! deadlines and auto-alerting after a scan.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    alert::{
        AlertDispatcher, AlertPayload, AlertSink, Recipient, StaticRecipientDirectory,
        DEADLINE_EXCEEDED, MAX_IN_FLIGHT_SENDS,
    },
    clock::FixedClock,
    config::DetectionConfig,
    engine::SentinelEngine,
    error::{SentinelError, SentinelResult},
    expense::{AnalysisWindow, ExpenseRecord, StoreSnapshotProvider},
    review::{BulkReviewAction, ReviewFilter},
    store::SentinelStore,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration as StdDuration,
};

const TENANT: &str = "acme";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

fn expense(id: &str, description: &str, amount: Decimal) -> ExpenseRecord {
    ExpenseRecord {
        id: id.to_string(),
        description: description.to_string(),
        amount,
        expense_date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
        department: None,
        status: "submitted".to_string(),
        submitter_id: None,
        submitter_name: None,
        category_id: None,
        category_name: None,
        created_at: now() - Duration::days(1),
    }
}

fn managers(n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient {
            user_id: format!("fm-{i:02}"),
            name: format!("Manager {i}"),
            address: format!("fm{i}@acme.test"),
        })
        .collect()
}

/// Records every delivery; fails recipients listed in `fail_for`.
#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(String, usize)>>,
    fail_for: Vec<String>,
    delay: StdDuration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl AlertSink for RecordingSink {
    fn deliver(&self, recipient: &Recipient, payload: &AlertPayload) -> anyhow::Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_for.contains(&recipient.user_id) {
            anyhow::bail!("mailbox {} rejected message", recipient.address);
        }
        self.delivered
            .lock()
            .push((recipient.user_id.clone(), payload.items.len()));
        Ok(())
    }
}

struct Harness {
    engine: SentinelEngine,
    sink: Arc<RecordingSink>,
}

/// Seeds three duplicate taxis (three High findings) and wires alerting.
fn harness(name: &str, recipients: usize, sink: RecordingSink) -> SentinelResult<Harness> {
    let _ = env_logger::builder().is_test(true).try_init();
    let uri = SentinelStore::shared_memory_uri(name);
    let snapshots = Arc::new(StoreSnapshotProvider::open(&uri)?);
    for id in ["taxi-1", "taxi-2", "taxi-3"] {
        snapshots.insert(&TENANT.to_string(), &expense(id, "Taxi", dec!(87.40)))?;
    }
    snapshots.insert(&TENANT.to_string(), &expense("hotel", "Hotel", dec!(490)))?;

    let sink = Arc::new(sink);
    let dispatcher = AlertDispatcher::new(
        Arc::new(StaticRecipientDirectory::new(managers(recipients))),
        sink.clone(),
    );
    let engine = SentinelEngine::open(&uri, snapshots, Arc::new(FixedClock::new(now())))?
        .with_alerting(dispatcher);
    Ok(Harness { engine, sink })
}

/// Every manager gets the payload; every attempt is logged as sent.
#[test]
fn dispatch_reaches_every_manager() -> SentinelResult<()> {
    let h = harness("alerts_all_sent", 3, RecordingSink::default())?;
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;

    let report = h.engine.dispatch_alerts(TENANT, None)?;
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert!(report.failures.is_empty());

    let mut delivered = h.sink.delivered.lock().clone();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![("fm-00".to_string(), 3), ("fm-01".to_string(), 3), ("fm-02".to_string(), 3)]
    );

    let log = h.engine.notification_log(TENANT)?;
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|row| row.is_sent() && row.finding_count == 3));
    assert!(log[0].payload.contains("taxi-1"));
    assert!(!log[0].payload.contains("hotel"), "only high findings are alerted");
    Ok(())
}

/// No pending High findings: nothing sent, nothing logged.
#[test]
fn no_high_findings_is_a_noop() -> SentinelResult<()> {
    let h = harness("alerts_noop", 2, RecordingSink::default())?;
    let report = h.engine.dispatch_alerts(TENANT, None)?;
    assert!(report.is_noop());
    assert_eq!((report.succeeded, report.failed), (0, 0));

    // Once every High finding is reviewed there is nothing left to alert.
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;
    let highs: Vec<_> = h
        .engine
        .review_records(TENANT, ReviewFilter::pending_high())?
        .into_iter()
        .map(|r| r.id)
        .collect();
    h.engine.bulk_transition(TENANT, &highs, BulkReviewAction::MarkReviewed, "rev-1", None)?;
    assert!(h.engine.dispatch_alerts(TENANT, None)?.is_noop());

    assert!(h.sink.delivered.lock().is_empty());
    assert!(h.engine.notification_log(TENANT)?.is_empty());
    Ok(())
}

/// One bad mailbox fails on its own; the rest still go out.
#[test]
fn delivery_failures_are_aggregated() -> SentinelResult<()> {
    let sink = RecordingSink { fail_for: vec!["fm-01".to_string()], ..RecordingSink::default() };
    let h = harness("alerts_partial_failure", 3, sink)?;
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;

    let report = h.engine.dispatch_alerts(TENANT, None)?;
    assert_eq!((report.attempted, report.succeeded, report.failed), (3, 2, 1));
    match &report.failures[..] {
        [SentinelError::AlertDeliveryFailed { recipient_id, reason }] => {
            assert_eq!(recipient_id, "fm-01");
            assert!(reason.contains("rejected"), "{reason}");
        }
        other => panic!("expected one AlertDeliveryFailed, got {other:?}"),
    }

    let log = h.engine.notification_log(TENANT)?;
    let failed: Vec<_> = log.iter().filter(|row| !row.is_sent()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_id, "fm-01");
    assert_eq!(failed[0].recipient_address, "fm1@acme.test");
    assert!(failed[0].failure_reason.as_deref().unwrap_or_default().contains("rejected"));
    Ok(())
}

/// Never more than MAX_IN_FLIGHT_SENDS deliveries at once.
#[test]
fn fan_out_is_bounded() -> SentinelResult<()> {
    let sink = RecordingSink { delay: StdDuration::from_millis(20), ..RecordingSink::default() };
    let h = harness("alerts_bounded", 20, sink)?;
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;

    let report = h.engine.dispatch_alerts(TENANT, None)?;
    assert_eq!(report.succeeded, 20);
    let max = h.sink.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= MAX_IN_FLIGHT_SENDS, "saw {max} concurrent sends");
    assert!(max > 1, "fan-out should run deliveries in parallel");
    Ok(())
}

/// Recipients still outstanding at the deadline are logged as failed.
#[test]
fn dispatch_deadline_marks_outstanding_failed() -> SentinelResult<()> {
    let sink = RecordingSink { delay: StdDuration::from_millis(300), ..RecordingSink::default() };
    let h = harness("alerts_deadline", 3, sink)?;
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;

    let err = h
        .engine
        .dispatch_alerts(TENANT, Some(StdDuration::from_millis(30)))
        .unwrap_err();
    assert!(matches!(err, SentinelError::Timeout { operation: "alert dispatch", .. }), "{err:?}");

    let log = h.engine.notification_log(TENANT)?;
    assert_eq!(log.len(), 3);
    for row in &log {
        assert!(!row.is_sent());
        assert_eq!(row.failure_reason.as_deref(), Some(DEADLINE_EXCEEDED));
    }
    Ok(())
}

/// Dispatching without alert collaborators is an error, not a silent no-op.
#[test]
fn dispatch_requires_alerting() -> SentinelResult<()> {
    let uri = SentinelStore::shared_memory_uri("alerts_unconfigured");
    let snapshots = Arc::new(StoreSnapshotProvider::open(&uri)?);
    let engine = SentinelEngine::open(&uri, snapshots, Arc::new(FixedClock::new(now())))?;
    assert!(matches!(engine.dispatch_alerts(TENANT, None), Err(SentinelError::Other(_))));
    Ok(())
}

/// With an auto-alert threshold, a scan that leaves enough pending High
/// findings alerts on its own.
#[test]
fn scan_auto_alerts_at_threshold() -> SentinelResult<()> {
    let h = harness("alerts_auto", 2, RecordingSink::default())?;
    let config = DetectionConfig { auto_alert_high_threshold: 3, ..DetectionConfig::default() };
    h.engine.update_detection_config(TENANT, &config, "admin")?;

    let report = h.engine.scan(TENANT, AnalysisWindow::default(), None)?;
    let alert = report.alert.expect("three pending highs reach the threshold");
    assert_eq!((alert.attempted, alert.succeeded), (2, 2));
    assert_eq!(h.engine.notification_log(TENANT)?.len(), 2);
    Ok(())
}

#[test]
fn scan_below_auto_alert_threshold_stays_quiet() -> SentinelResult<()> {
    let h = harness("alerts_auto_quiet", 2, RecordingSink::default())?;
    let config = DetectionConfig { auto_alert_high_threshold: 4, ..DetectionConfig::default() };
    h.engine.update_detection_config(TENANT, &config, "admin")?;

    let report = h.engine.scan(TENANT, AnalysisWindow::default(), None)?;
    assert!(report.alert.is_none());

    // Disabled by default.
    h.engine.reset_detection_config(TENANT, "admin")?;
    assert!(h.engine.scan(TENANT, AnalysisWindow::default(), None)?.alert.is_none());
    assert!(h.sink.delivered.lock().is_empty());
    Ok(())
}

#[test]
fn notification_payload_lists_high_items() -> SentinelResult<()> {
    let h = harness("alerts_subject", 1, RecordingSink::default())?;
    h.engine.scan(TENANT, AnalysisWindow::default(), None)?;
    assert!(h.engine.notification_log(TENANT)?.is_empty());

    h.engine.dispatch_alerts(TENANT, None)?;
    let row = &h.engine.notification_log(TENANT)?[0];
    let payload: serde_json::Value = serde_json::from_str(&row.payload)?;
    assert_eq!(payload["tenant_id"], TENANT);
    assert_eq!(payload["items"].as_array().map(Vec::len), Some(3));
    assert_eq!(payload["items"][0]["severity"], "high");
    Ok(())
}
