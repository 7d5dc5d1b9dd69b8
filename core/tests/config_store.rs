//! Detection config store: defaults, validation, versioning, reset and
//! loading from disk.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    clock::FixedClock,
    config::DetectionConfig,
    engine::SentinelEngine,
    error::{SentinelError, SentinelResult},
    expense::{AnalysisWindow, ExpenseRecord, StoreSnapshotProvider},
    store::SentinelStore,
};
use std::{io::Write, sync::Arc};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

fn store() -> SentinelResult<SentinelStore> {
    let store = SentinelStore::in_memory()?;
    store.migrate()?;
    Ok(store)
}

fn field_of(err: SentinelError) -> &'static str {
    match err {
        SentinelError::ConfigInvalid { field, .. } => field,
        other => panic!("expected ConfigInvalid, got {other:?}"),
    }
}

/// A tenant that never saved a config reads the defaults, not an error.
#[test]
fn unconfigured_tenant_reads_defaults() -> SentinelResult<()> {
    let store = store()?;
    let record = store.detection_config("acme")?;
    assert!(record.is_default());
    assert_eq!(record.version, 0);
    assert_eq!(record.config, DetectionConfig::default());
    assert_eq!(record.config.high_amount_threshold_percent, 200);
    assert_eq!(record.config.min_high_amount, dec!(500));
    assert_eq!(record.config.rapid_succession_minutes, 30);
    assert_eq!(record.config.rapid_succession_count, 3);
    assert_eq!(record.config.approval_threshold_percent, 5);
    assert_eq!(
        record.config.threshold_limits,
        vec![dec!(100), dec!(500), dec!(1000), dec!(2500), dec!(5000)]
    );
    assert!(record.config.is_active);
    Ok(())
}

/// Each save bumps the version and records who and when.
#[test]
fn save_bumps_version() -> SentinelResult<()> {
    let store = store()?;
    let config = DetectionConfig { rapid_succession_minutes: 15, ..DetectionConfig::default() };

    let first = store.save_detection_config("acme", &config, "admin-1", now())?;
    assert_eq!(first.version, 1);
    assert_eq!(first.updated_by.as_deref(), Some("admin-1"));
    assert_eq!(first.updated_at, Some(now()));
    assert_eq!(first.config.rapid_succession_minutes, 15);

    let later = now() + Duration::hours(2);
    let second = store.save_detection_config("acme", &config, "admin-2", later)?;
    assert_eq!(second.version, 2);
    assert_eq!(second.updated_by.as_deref(), Some("admin-2"));
    assert_eq!(second.updated_at, Some(later));

    assert!(store.detection_config("globex")?.is_default());
    Ok(())
}

/// Out-of-range values are rejected, not clamped, and nothing is stored.
#[test]
fn invalid_values_rejected() -> SentinelResult<()> {
    let store = store()?;
    let cases = [
        (DetectionConfig { rapid_succession_count: 1, ..DetectionConfig::default() }, "rapid_succession_count"),
        (DetectionConfig { approval_threshold_percent: 0, ..DetectionConfig::default() }, "approval_threshold_percent"),
        (DetectionConfig { approval_threshold_percent: 101, ..DetectionConfig::default() }, "approval_threshold_percent"),
        (DetectionConfig { high_amount_threshold_percent: 0, ..DetectionConfig::default() }, "high_amount_threshold_percent"),
        (DetectionConfig { rapid_succession_minutes: 0, ..DetectionConfig::default() }, "rapid_succession_minutes"),
        (DetectionConfig { min_high_amount: dec!(-1), ..DetectionConfig::default() }, "min_high_amount"),
        (DetectionConfig { threshold_limits: vec![dec!(500), dec!(0)], ..DetectionConfig::default() }, "threshold_limits"),
        (DetectionConfig { round_amount_divisors: vec![dec!(-100)], ..DetectionConfig::default() }, "round_amount_divisors"),
    ];
    for (config, field) in cases {
        let err = store.save_detection_config("acme", &config, "admin", now()).unwrap_err();
        assert_eq!(field_of(err), field);
    }
    assert!(store.detection_config("acme")?.is_default());
    Ok(())
}

/// The ends of each accepted range save and scan normally.
#[test]
fn edge_of_range_values_accepted() -> SentinelResult<()> {
    let store = store()?;
    let config = DetectionConfig {
        rapid_succession_count: 2,
        approval_threshold_percent: 100,
        rapid_succession_minutes: 1,
        high_amount_threshold_percent: 1,
        min_high_amount: dec!(0),
        round_amount_threshold: dec!(0),
        round_amount_divisors: vec![dec!(0.01)],
        ..DetectionConfig::default()
    };
    let record = store.save_detection_config("acme", &config, "admin", now())?;
    assert_eq!(record.config.approval_threshold_percent, 100);
    assert_eq!(record.config.rapid_succession_count, 2);
    Ok(())
}

/// A limit whose approval band overflows is rejected when written, so no
/// scan ever sees it.
#[test]
fn limit_with_unrepresentable_band_rejected() -> SentinelResult<()> {
    let store = store()?;
    let config = DetectionConfig {
        threshold_limits: vec![dec!(500), Decimal::MAX],
        ..DetectionConfig::default()
    };
    assert!(config.validate().is_err());
    let err = store.save_detection_config("acme", &config, "admin", now()).unwrap_err();
    assert_eq!(field_of(err), "threshold_limits");
    assert!(store.detection_config("acme")?.is_default());

    // Large limits with a representable band are still fine.
    let config = DetectionConfig {
        threshold_limits: vec![Decimal::from(1_000_000_000_000_000_000_i64)],
        approval_threshold_percent: 100,
        ..DetectionConfig::default()
    };
    store.save_detection_config("acme", &config, "admin", now())?;
    Ok(())
}

/// Limits and divisors come back sorted and de-duplicated.
#[test]
fn saved_sets_are_normalized() -> SentinelResult<()> {
    let store = store()?;
    let config = DetectionConfig {
        threshold_limits: vec![dec!(1000), dec!(250), dec!(1000), dec!(75)],
        round_amount_divisors: vec![dec!(500), dec!(50)],
        ..DetectionConfig::default()
    };
    let record = store.save_detection_config("acme", &config, "admin", now())?;
    assert_eq!(record.config.threshold_limits, vec![dec!(75), dec!(250), dec!(1000)]);
    assert_eq!(record.config.round_amount_divisors, vec![dec!(50), dec!(500)]);
    Ok(())
}

/// Reset restores defaults but keeps the tenant's row and history.
#[test]
fn reset_restores_defaults() -> SentinelResult<()> {
    let store = store()?;
    let config = DetectionConfig { weekend_detection_enabled: false, ..DetectionConfig::default() };
    store.save_detection_config("acme", &config, "admin", now())?;

    let reset = store.reset_detection_config("acme", "admin-2", now())?;
    assert_eq!(reset.config, DetectionConfig::default());
    assert_eq!(reset.version, 2);
    assert!(!reset.is_default());
    assert_eq!(reset.updated_by.as_deref(), Some("admin-2"));
    Ok(())
}

/// Partial JSON files fill the gaps with defaults.
#[test]
fn load_partial_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{ "rapid_succession_count": 4, "threshold_limits": ["2500", "500"], "is_active": false }}"#
    )?;
    let path = file.path().to_string_lossy().to_string();

    let config = DetectionConfig::load(&path)?;
    assert_eq!(config.rapid_succession_count, 4);
    assert_eq!(config.threshold_limits, vec![dec!(500), dec!(2500)]);
    assert!(!config.is_active);
    assert_eq!(config.approval_threshold_percent, 5);
    Ok(())
}

#[test]
fn load_rejects_invalid_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{ "approval_threshold_percent": 250 }}"#)?;
    let path = file.path().to_string_lossy().to_string();
    assert!(DetectionConfig::load(&path).is_err());
    assert!(DetectionConfig::load("/definitely/not/here.json").is_err());
    Ok(())
}

/// A scan runs with whatever config the tenant saved.
#[test]
fn scan_uses_tenant_config() -> SentinelResult<()> {
    let uri = SentinelStore::shared_memory_uri("config_scan_uses_tenant");
    let snapshots = Arc::new(StoreSnapshotProvider::open(&uri)?);
    let saturday = ExpenseRecord {
        id: "sat".into(),
        description: "Conference badge".into(),
        amount: dec!(42.50),
        expense_date: chrono::NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
        department: None,
        status: "submitted".into(),
        submitter_id: None,
        submitter_name: None,
        category_id: None,
        category_name: None,
        created_at: now() - Duration::days(3),
    };
    snapshots.insert(&"acme".to_string(), &saturday)?;
    snapshots.insert(&"globex".to_string(), &saturday)?;
    let engine = SentinelEngine::open(&uri, snapshots, Arc::new(FixedClock::new(now())))?;

    let quiet = DetectionConfig { weekend_detection_enabled: false, ..DetectionConfig::default() };
    let saved = engine.update_detection_config("acme", &quiet, "admin")?;
    assert_eq!(saved.version, 1);

    assert_eq!(engine.scan("acme", AnalysisWindow::default(), None)?.summary.total, 0);
    assert_eq!(engine.scan("globex", AnalysisWindow::default(), None)?.summary.total, 1);

    let off = DetectionConfig { is_active: false, ..DetectionConfig::default() };
    engine.update_detection_config("globex", &off, "admin")?;
    let report = engine.scan("globex", AnalysisWindow::default(), None)?;
    assert!(report.findings.is_empty());
    assert_eq!(report.expense_count, 1);

    engine.reset_detection_config("acme", "admin")?;
    assert_eq!(engine.detection_config("acme")?.version, 2);
    Ok(())
}
