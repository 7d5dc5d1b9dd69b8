//! scan-runner: headless scan over deterministic demo expenses.
//!
//! Usage:
//!   scan-runner --tenant acme --seed 12345 --expenses 300 --days 90 --db run.db
//!   scan-runner --config detection.json --timeout-ms 2000 --alert

mod demo_data;

use anyhow::Result;
use sentinel_core::{
    alert::{AlertDispatcher, AlertPayload, AlertSink, Recipient, StaticRecipientDirectory},
    clock::{Clock, SystemClock},
    config::DetectionConfig,
    engine::{ScanReport, SentinelEngine},
    expense::{AnalysisWindow, StoreSnapshotProvider},
    finding::{RuleType, Severity},
    review::ReviewStats,
    store::SentinelStore,
};
use std::{env, sync::Arc, time::Duration};

/// Prints alerts instead of sending them.
struct LogSink;

impl AlertSink for LogSink {
    fn deliver(&self, recipient: &Recipient, payload: &AlertPayload) -> anyhow::Result<()> {
        log::info!(
            "alert -> {} <{}>: {}",
            recipient.name,
            recipient.address,
            payload.subject()
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let expense_count = parse_arg(&args, "--expenses", 200usize);
    let days = parse_arg(&args, "--days", 90u32);
    let timeout_ms = parse_arg(&args, "--timeout-ms", 0u64);
    let alert = args.iter().any(|a| a == "--alert");
    let tenant = string_arg(&args, "--tenant").unwrap_or("demo");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let config_path = string_arg(&args, "--config");

    println!("Expense sentinel — scan-runner");
    println!("  tenant:    {tenant}");
    println!("  seed:      {seed}");
    println!("  expenses:  {expense_count}");
    println!("  window:    {days} days");
    println!("  db:        {db}");
    println!();

    // For :memory: use a shared-memory URI so the snapshot provider and
    // the engine's per-operation connections all see one database.
    let db_effective = if db == ":memory:" {
        SentinelStore::shared_memory_uri(&format!("scanrun_{seed}"))
    } else {
        db.to_string()
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    let snapshots = Arc::new(StoreSnapshotProvider::open(&db_effective)?);
    let tenant_id = tenant.to_string();
    for expense in demo_data::generate(seed, expense_count, days, now) {
        snapshots.insert(&tenant_id, &expense)?;
    }

    let mut engine = SentinelEngine::open(&db_effective, snapshots, Arc::clone(&clock))?;
    if alert {
        let directory = StaticRecipientDirectory::new(vec![Recipient {
            user_id: "u-finance".to_string(),
            name: "Finance Manager".to_string(),
            address: "finance@example.com".to_string(),
        }]);
        engine = engine.with_alerting(AlertDispatcher::new(Arc::new(directory), Arc::new(LogSink)));
    }

    if let Some(path) = config_path {
        let config = DetectionConfig::load(path)?;
        let record = engine.update_detection_config(tenant, &config, "scan-runner")?;
        println!("Loaded detection config from {path} (version {})", record.version);
    }

    let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
    let report = engine.scan(tenant, AnalysisWindow::last_days(days), timeout)?;
    print_scan(&report);

    let stats = engine.review_stats(tenant)?;
    print_stats(&stats);

    if alert {
        let dispatch = engine.dispatch_alerts(tenant, timeout)?;
        println!();
        println!("=== ALERTS ===");
        println!("  attempted:  {}", dispatch.attempted);
        println!("  sent:       {}", dispatch.succeeded);
        println!("  failed:     {}", dispatch.failed);
        for failure in &dispatch.failures {
            println!("    {failure}");
        }
    }

    Ok(())
}

fn print_scan(report: &ScanReport) {
    println!("=== SCAN SUMMARY ===");
    println!("  scanned at:     {}", report.scanned_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  expenses:       {}", report.expense_count);
    println!("  findings:       {}", report.summary.total);
    for severity in [Severity::High, Severity::Medium, Severity::Low] {
        println!("    {:<8}      {}", severity.as_str(), report.summary.severity_count(severity));
    }
    println!("  by rule:");
    for rule in RuleType::ALL {
        let count = report.summary.rule_count(rule);
        if count > 0 {
            println!("    {:<18}{count}", rule.as_str());
        }
    }
    println!("  new reviews:    {}", report.reconcile.created);
    println!("  already known:  {}", report.reconcile.existing);
    if !report.reconcile.conflicts.is_empty() {
        println!("  skipped:        {}", report.reconcile.conflicts.len());
    }

    println!();
    println!("=== HIGH SEVERITY ===");
    let high: Vec<_> = report
        .findings
        .iter()
        .filter(|f| f.severity == Severity::High)
        .collect();
    if high.is_empty() {
        println!("  (none)");
    }
    for finding in high {
        println!(
            "  {:<24} {:>10}  {}",
            finding.expense_id, finding.expense.amount, finding.details
        );
    }
}

fn print_stats(stats: &ReviewStats) {
    println!();
    println!("=== REVIEW LEDGER ===");
    for (status, count) in &stats.by_status {
        println!("  {:<10}  {count}", status.as_str());
    }
    println!("  high pending: {}", stats.high_pending);
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
