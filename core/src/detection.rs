//! Detection engine.
//!
//! `detect` is a pure function of (expenses, config, now):
//!   - no store access, no clock reads, no I/O
//!   - identical inputs produce identical, identically ordered findings
//!
//! Rules evaluated per expense:
//!   1. HighAmount       — outlier against the expense's category statistics
//!   2. Duplicate        — same amount, description and expense date
//!   3. RapidSuccession  — burst of submissions by one submitter
//!   4. ThresholdGaming  — amount parked just under an approval limit
//!   5. WeekendExpense   — expense dated on a Saturday or Sunday
//!   6. RoundAmount      — large amount divisible by a round divisor
//!   7. UnusualCategory  — first use of a category by an established submitter
//!
//! Category statistics, submitter timelines and the duplicate index are
//! built once per call, so a scan is O(n log n) rather than a rescan of
//! the snapshot per expense.

use crate::{
    config::DetectionConfig,
    expense::ExpenseRecord,
    finding::{Finding, RuleType, Severity},
    scoring::dedup_findings,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::collections::HashMap;

// ── Constants ────────────────────────────────────────────────────────────────

/// Category groups smaller than this have no statistics.
pub const MIN_CATEGORY_SAMPLE: usize = 3;
const HIGH_SEVERITY_MEAN_MULTIPLE: f64 = 5.0;
const MEDIUM_SEVERITY_MEAN_MULTIPLE: f64 = 3.0;

// ── Precomputed groupings ────────────────────────────────────────────────────

/// Mean and population standard deviation of one category's amounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl CategoryStats {
    /// `None` when there are fewer than `MIN_CATEGORY_SAMPLE` amounts.
    pub fn from_amounts(amounts: &[f64]) -> Option<Self> {
        if amounts.len() < MIN_CATEGORY_SAMPLE {
            return None;
        }
        let n = amounts.len() as f64;
        let mean = amounts.iter().sum::<f64>() / n;
        let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
        Some(Self { count: amounts.len(), mean, std_dev: variance.sqrt() })
    }

    /// The amount an expense has to exceed to count as an outlier.
    pub fn outlier_threshold(&self, threshold_percent: u32) -> f64 {
        self.mean + self.std_dev * (f64::from(threshold_percent) / 100.0)
    }
}

type DuplicateKey = (Decimal, String, NaiveDate);

struct Snapshot<'a> {
    expenses: &'a [ExpenseRecord],
    /// Keyed by `category_id`; `None` is the uncategorized group.
    category_stats: HashMap<Option<&'a str>, CategoryStats>,
    /// Per submitter: (created_at, index) sorted by time.
    timelines: HashMap<&'a str, Vec<(DateTime<Utc>, usize)>>,
    duplicates: HashMap<DuplicateKey, Vec<usize>>,
    /// Per submitter: how many of their expenses fall in each category.
    category_usage: HashMap<&'a str, HashMap<Option<&'a str>, usize>>,
}

impl<'a> Snapshot<'a> {
    fn build(expenses: &'a [ExpenseRecord]) -> Self {
        let mut amounts_by_category: HashMap<Option<&str>, Vec<f64>> = HashMap::new();
        let mut timelines: HashMap<&str, Vec<(DateTime<Utc>, usize)>> = HashMap::new();
        let mut duplicates: HashMap<DuplicateKey, Vec<usize>> = HashMap::new();
        let mut category_usage: HashMap<&str, HashMap<Option<&str>, usize>> = HashMap::new();

        for (idx, expense) in expenses.iter().enumerate() {
            let category = expense.category_id.as_deref();
            amounts_by_category
                .entry(category)
                .or_default()
                .push(expense.amount.to_f64().unwrap_or(0.0));

            duplicates.entry(duplicate_key(expense)).or_default().push(idx);

            if let Some(submitter) = expense.submitter_id.as_deref() {
                timelines.entry(submitter).or_default().push((expense.created_at, idx));
                *category_usage
                    .entry(submitter)
                    .or_default()
                    .entry(category)
                    .or_insert(0) += 1;
            }
        }

        for timeline in timelines.values_mut() {
            timeline.sort();
        }

        let category_stats = amounts_by_category
            .into_iter()
            .filter_map(|(category, amounts)| {
                CategoryStats::from_amounts(&amounts).map(|stats| (category, stats))
            })
            .collect();

        Self { expenses, category_stats, timelines, duplicates, category_usage }
    }

    fn ids(&self, indices: impl IntoIterator<Item = usize>) -> Vec<String> {
        let mut ids: Vec<String> =
            indices.into_iter().map(|i| self.expenses[i].id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn duplicate_key(expense: &ExpenseRecord) -> DuplicateKey {
    (expense.amount.normalize(), expense.description.to_lowercase(), expense.expense_date)
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Run every rule over `expenses` and return deduplicated findings,
/// sorted by (expense id, rule type).
pub fn detect(
    expenses: &[ExpenseRecord],
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Vec<Finding> {
    if !config.is_active {
        return Vec::new();
    }

    let config = config.clone().normalized();
    let snapshot = Snapshot::build(expenses);
    let mut findings = Vec::new();

    for (idx, expense) in expenses.iter().enumerate() {
        let rules = [
            high_amount(&snapshot, expense, &config, now),
            duplicate(&snapshot, idx, expense, now),
            rapid_succession(&snapshot, idx, expense, &config, now),
            threshold_gaming(expense, &config, now),
            weekend_expense(expense, &config, now),
            round_amount(expense, &config, now),
            unusual_category(&snapshot, expense, &config, now),
        ];
        findings.extend(rules.into_iter().flatten());
    }

    dedup_findings(findings)
}

fn finding(
    expense: &ExpenseRecord,
    rule_type: RuleType,
    severity: Severity,
    description: &str,
    details: String,
    related_expense_ids: Vec<String>,
    now: DateTime<Utc>,
) -> Finding {
    Finding {
        id: Finding::finding_id(&expense.id, rule_type),
        expense_id: expense.id.clone(),
        rule_type,
        severity,
        description: description.to_string(),
        details,
        related_expense_ids,
        detected_at: now,
        expense: expense.summary(),
    }
}

// ── Rules ────────────────────────────────────────────────────────────────────

fn high_amount<'a>(
    snapshot: &Snapshot<'a>,
    expense: &'a ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    let stats = snapshot.category_stats.get(&expense.category_id.as_deref())?;
    if expense.amount < config.min_high_amount {
        return None;
    }

    let amount = expense.amount.to_f64()?;
    if amount <= stats.outlier_threshold(config.high_amount_threshold_percent) {
        return None;
    }

    let severity = if amount > stats.mean * HIGH_SEVERITY_MEAN_MULTIPLE {
        Severity::High
    } else if amount > stats.mean * MEDIUM_SEVERITY_MEAN_MULTIPLE {
        Severity::Medium
    } else {
        Severity::Low
    };

    let percent_above_mean = (amount - stats.mean) / stats.mean * 100.0;
    let category = expense.category_name.as_deref().unwrap_or("Uncategorized");
    let details = format!(
        "${} is {:.0}% above the {} average of ${:.2} (std dev ${:.2}, {} expenses)",
        expense.amount.round_dp(2),
        percent_above_mean,
        category,
        stats.mean,
        stats.std_dev,
        stats.count,
    );

    Some(finding(expense, RuleType::HighAmount, severity, "Unusually high amount", details, Vec::new(), now))
}

fn duplicate(
    snapshot: &Snapshot<'_>,
    idx: usize,
    expense: &ExpenseRecord,
    now: DateTime<Utc>,
) -> Option<Finding> {
    let matches = snapshot.duplicates.get(&duplicate_key(expense))?;
    let related = snapshot.ids(matches.iter().copied().filter(|&i| i != idx));
    if related.is_empty() {
        return None;
    }

    let details = format!(
        "{} other expense(s) share amount ${}, description \"{}\" and date {}",
        related.len(),
        expense.amount.round_dp(2),
        expense.description,
        expense.expense_date,
    );

    Some(finding(expense, RuleType::Duplicate, Severity::High, "Possible duplicate submission", details, related, now))
}

fn rapid_succession(
    snapshot: &Snapshot<'_>,
    idx: usize,
    expense: &ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    let submitter = expense.submitter_id.as_deref()?;
    let timeline = snapshot.timelines.get(submitter)?;

    // Symmetric window: |Δcreated_at| ≤ rapid_succession_minutes.
    let window = Duration::minutes(i64::from(config.rapid_succession_minutes));
    let start = timeline.partition_point(|(t, _)| *t < expense.created_at - window);
    let end = timeline.partition_point(|(t, _)| *t <= expense.created_at + window);

    let cluster: Vec<usize> = timeline[start..end]
        .iter()
        .map(|&(_, i)| i)
        .filter(|&i| i != idx)
        .collect();

    let needed = config.rapid_succession_count.saturating_sub(1) as usize;
    if cluster.len() < needed {
        return None;
    }

    let related = snapshot.ids(cluster);
    let details = format!(
        "{} expenses submitted by {} within {} minutes of each other",
        related.len() + 1,
        expense.submitter_name.as_deref().unwrap_or(submitter),
        config.rapid_succession_minutes,
    );

    Some(finding(expense, RuleType::RapidSuccession, Severity::Medium, "Rapid succession submissions", details, related, now))
}

fn threshold_gaming(
    expense: &ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    // First limit in ascending order wins; an expense is flagged once.
    // Limits whose band overflows never match.
    let limit = config.threshold_limits.iter().copied().find(|&limit| {
        config
            .proximity_floor(limit)
            .is_some_and(|floor| floor <= expense.amount && expense.amount < limit)
    })?;

    let details = format!(
        "${} is ${} below the ${} approval limit (within {}%)",
        expense.amount.round_dp(2),
        (limit - expense.amount).round_dp(2),
        limit,
        config.approval_threshold_percent,
    );

    Some(finding(expense, RuleType::ThresholdGaming, Severity::Medium, "Amount just under approval limit", details, Vec::new(), now))
}

fn weekend_expense(
    expense: &ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    if !config.weekend_detection_enabled {
        return None;
    }
    let weekday = expense.expense_date.weekday();
    if !matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return None;
    }

    let details = format!("Expense dated {} ({})", expense.expense_date, weekday);
    Some(finding(expense, RuleType::WeekendExpense, Severity::Low, "Weekend expense", details, Vec::new(), now))
}

fn round_amount(
    expense: &ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    if expense.amount < config.round_amount_threshold {
        return None;
    }
    let divisor = config
        .round_amount_divisors
        .iter()
        .copied()
        .find(|&d| (expense.amount % d).is_zero())?;

    let details = format!(
        "${} is an exact multiple of ${}",
        expense.amount.round_dp(2),
        divisor,
    );

    Some(finding(expense, RuleType::RoundAmount, Severity::Low, "Suspiciously round amount", details, Vec::new(), now))
}

fn unusual_category<'a>(
    snapshot: &Snapshot<'a>,
    expense: &'a ExpenseRecord,
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Finding> {
    if config.unusual_category_min_history == 0 {
        return None;
    }
    let submitter = expense.submitter_id.as_deref()?;
    let category = expense.category_id.as_deref()?;
    let usage = snapshot.category_usage.get(submitter)?;

    let history: usize = usage.values().sum::<usize>() - 1;
    let same_category = usage.get(&Some(category)).copied().unwrap_or(0) - 1;
    if history < config.unusual_category_min_history as usize || same_category > 0 {
        return None;
    }

    let details = format!(
        "First {} expense among {} submissions by {}",
        expense.category_name.as_deref().unwrap_or(category),
        history + 1,
        expense.submitter_name.as_deref().unwrap_or(submitter),
    );

    Some(finding(expense, RuleType::UnusualCategory, Severity::Low, "Unusual category for submitter", details, Vec::new(), now))
}
