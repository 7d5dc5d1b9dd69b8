//! Expense records and the snapshot provider boundary.
//!
//! The expense store belongs to someone else. This core only ever reads
//! a window of it through `ExpenseSnapshotProvider`.

use crate::{
    error::SentinelResult,
    store::SentinelStore,
    types::{ExpenseId, TenantId},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: ExpenseId,
    pub description: String,
    pub amount: Decimal,
    /// The calendar day the money was spent.
    pub expense_date: NaiveDate,
    pub department: Option<String>,
    pub status: String,
    pub submitter_id: Option<String>,
    pub submitter_name: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    /// When the expense was submitted. Distinct from `expense_date`.
    pub created_at: DateTime<Utc>,
}

impl ExpenseRecord {
    pub fn summary(&self) -> ExpenseSummary {
        ExpenseSummary {
            description: self.description.clone(),
            amount: self.amount,
            expense_date: self.expense_date,
            submitter_name: self.submitter_name.clone(),
            category_name: self.category_name.clone(),
        }
    }
}

/// The display fields a review row carries for its expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub description: String,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    pub submitter_name: Option<String>,
    pub category_name: Option<String>,
}

/// How far back a scan looks, measured on submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub days: u32,
}

impl AnalysisWindow {
    pub fn last_days(days: u32) -> Self {
        Self { days }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }
}

impl Default for AnalysisWindow {
    fn default() -> Self {
        Self::last_days(90)
    }
}

/// Read-only source of expense records for a tenant.
pub trait ExpenseSnapshotProvider: Send + Sync {
    /// Every expense of `tenant_id` submitted at or after `since`.
    fn expenses_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ExpenseRecord>>;
}

/// Snapshot provider backed by the `expense` table of a sentinel database.
pub struct StoreSnapshotProvider {
    store: Mutex<SentinelStore>,
}

impl StoreSnapshotProvider {
    /// Open a dedicated connection to the database at `path`.
    pub fn open(path: &str) -> SentinelResult<Self> {
        let store = SentinelStore::open(path)?;
        store.migrate()?;
        Ok(Self { store: Mutex::new(store) })
    }

    pub fn insert(&self, tenant_id: &TenantId, expense: &ExpenseRecord) -> SentinelResult<()> {
        self.store.lock().insert_expense(tenant_id, expense)
    }
}

impl ExpenseSnapshotProvider for StoreSnapshotProvider {
    fn expenses_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ExpenseRecord>> {
        Ok(self.store.lock().expenses_since(tenant_id, since)?)
    }
}
