//! Finding summary over real detection output.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    config::DetectionConfig,
    detection::detect,
    expense::ExpenseRecord,
    finding::{RuleType, Severity},
    scoring::{dedup_findings, FindingSummary},
};

fn expense(id: &str, description: &str, amount: Decimal, day: u32, minute: i64) -> ExpenseRecord {
    ExpenseRecord {
        id: id.to_string(),
        description: description.to_string(),
        amount,
        expense_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        department: None,
        status: "submitted".to_string(),
        submitter_id: Some("u1".to_string()),
        submitter_name: Some("Ada Byron".to_string()),
        category_id: Some("travel".to_string()),
        category_name: Some("Travel".to_string()),
        created_at: Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap() + Duration::minutes(minute),
    }
}

/// Summary counts add up to the total, both by severity and by rule.
#[test]
fn summary_partitions_findings() {
    let expenses = vec![
        expense("a", "Taxi", dec!(120), 2, 0),
        expense("b", "Taxi", dec!(120), 2, 10),
        expense("c", "Hotel", dec!(495), 3, 20),
        expense("d", "Flight", dec!(1000), 7, 300),
        expense("e", "Parking", dec!(12.75), 3, 600),
    ];
    let findings = detect(&expenses, &DetectionConfig::default(), Utc::now());
    let summary = FindingSummary::from_findings(&findings);

    assert_eq!(summary.total, findings.len());
    assert_eq!(summary.by_severity.values().sum::<usize>(), summary.total);
    assert_eq!(summary.by_rule.values().sum::<usize>(), summary.total);

    // a, b: duplicate (High). a, b, c: rapid succession (Medium).
    // c: threshold gaming (Medium). d: weekend + round (Low).
    assert_eq!(summary.rule_count(RuleType::Duplicate), 2);
    assert_eq!(summary.rule_count(RuleType::RapidSuccession), 3);
    assert_eq!(summary.rule_count(RuleType::ThresholdGaming), 1);
    assert_eq!(summary.rule_count(RuleType::WeekendExpense), 1);
    assert_eq!(summary.rule_count(RuleType::RoundAmount), 1);
    assert_eq!(summary.severity_count(Severity::High), 2);
    assert_eq!(summary.severity_count(Severity::Medium), 4);
    assert_eq!(summary.severity_count(Severity::Low), 2);
}

#[test]
fn empty_input_empty_summary() {
    let summary = FindingSummary::from_findings(&[]);
    assert_eq!(summary.total, 0);
    assert!(summary.by_severity.is_empty());
    assert!(dedup_findings(Vec::new()).is_empty());
}

/// Dedup is a no-op on detection output, which is already unique.
#[test]
fn dedup_is_idempotent_on_detect_output() {
    let expenses = vec![
        expense("a", "Taxi", dec!(120), 2, 0),
        expense("b", "Taxi", dec!(120), 2, 10),
    ];
    let findings = detect(&expenses, &DetectionConfig::default(), Utc::now());
    assert_eq!(dedup_findings(findings.clone()), findings);
}
