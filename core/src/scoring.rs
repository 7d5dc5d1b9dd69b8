//! Deduplication and summary scoring over a finding set.

use crate::finding::{Finding, RuleType, Severity};
use serde::Serialize;
use std::collections::{btree_map::Entry, BTreeMap};

/// Collapse findings to one per (expense, rule type), keeping the highest
/// severity. On a severity tie the first finding emitted wins.
/// Output is sorted by (expense id, rule type).
pub fn dedup_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut best: BTreeMap<(String, RuleType), Finding> = BTreeMap::new();
    for finding in findings {
        match best.entry(finding.key()) {
            Entry::Vacant(slot) => {
                slot.insert(finding);
            }
            Entry::Occupied(mut slot) => {
                if finding.severity > slot.get().severity {
                    slot.insert(finding);
                }
            }
        }
    }
    best.into_values().collect()
}

/// Counts derived from the current finding set. Never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FindingSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_rule: BTreeMap<RuleType, usize>,
}

impl FindingSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self { total: findings.len(), ..Self::default() };
        for finding in findings {
            *summary.by_severity.entry(finding.severity).or_insert(0) += 1;
            *summary.by_rule.entry(finding.rule_type).or_insert(0) += 1;
        }
        summary
    }

    pub fn severity_count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn rule_count(&self, rule_type: RuleType) -> usize {
        self.by_rule.get(&rule_type).copied().unwrap_or(0)
    }
}
