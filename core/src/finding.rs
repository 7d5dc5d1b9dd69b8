//! Findings — the ephemeral output of one detection pass.
//!
//! Findings are recomputed on every scan and never stored directly.
//! The review ledger turns them into `ReviewRecord`s.

use crate::{
    expense::ExpenseSummary,
    types::ExpenseId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    HighAmount,
    Duplicate,
    RapidSuccession,
    ThresholdGaming,
    WeekendExpense,
    RoundAmount,
    UnusualCategory,
}

impl RuleType {
    pub const ALL: [RuleType; 7] = [
        RuleType::HighAmount,
        RuleType::Duplicate,
        RuleType::RapidSuccession,
        RuleType::ThresholdGaming,
        RuleType::WeekendExpense,
        RuleType::RoundAmount,
        RuleType::UnusualCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::HighAmount => "high_amount",
            RuleType::Duplicate => "duplicate",
            RuleType::RapidSuccession => "rapid_succession",
            RuleType::ThresholdGaming => "threshold_gaming",
            RuleType::WeekendExpense => "weekend_expense",
            RuleType::RoundAmount => "round_amount",
            RuleType::UnusualCategory => "unusual_category",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered: `Low < Medium < High`, so "keep the highest" is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// `"{expense_id}:{rule_type}"` — stable across scans.
    pub id: String,
    pub expense_id: ExpenseId,
    pub rule_type: RuleType,
    pub severity: Severity,
    /// Short label.
    pub description: String,
    /// Human-readable explanation with the computed figures.
    pub details: String,
    /// Sorted, never contains `expense_id` itself.
    pub related_expense_ids: Vec<ExpenseId>,
    pub detected_at: DateTime<Utc>,
    pub expense: ExpenseSummary,
}

impl Finding {
    pub fn finding_id(expense_id: &str, rule_type: RuleType) -> String {
        format!("{expense_id}:{rule_type}")
    }

    /// Dedup key: at most one finding per pair.
    pub fn key(&self) -> (ExpenseId, RuleType) {
        (self.expense_id.clone(), self.rule_type)
    }
}
