//! Expense snapshot queries.

use super::{decimal_column, SentinelStore};
use crate::{error::SentinelResult, expense::ExpenseRecord};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl SentinelStore {
    /// Insert or replace one expense row.
    pub fn insert_expense(&self, tenant_id: &str, expense: &ExpenseRecord) -> SentinelResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO expense
             (tenant_id, expense_id, description, amount, expense_date, department, status,
              submitter_id, submitter_name, category_id, category_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                tenant_id,
                expense.id,
                expense.description,
                expense.amount.to_string(),
                expense.expense_date,
                expense.department,
                expense.status,
                expense.submitter_id,
                expense.submitter_name,
                expense.category_id,
                expense.category_name,
                expense.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn expenses_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> SentinelResult<Vec<ExpenseRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT expense_id, description, amount, expense_date, department, status,
                    submitter_id, submitter_name, category_id, category_name, created_at
             FROM expense
             WHERE tenant_id = ?1 AND created_at >= ?2
             ORDER BY created_at ASC, expense_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id, since], |row| {
            Ok(ExpenseRecord {
                id: row.get(0)?,
                description: row.get(1)?,
                amount: decimal_column(row, 2)?,
                expense_date: row.get(3)?,
                department: row.get(4)?,
                status: row.get(5)?,
                submitter_id: row.get(6)?,
                submitter_name: row.get(7)?,
                category_id: row.get(8)?,
                category_name: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn expense_count(&self, tenant_id: &str) -> SentinelResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM expense WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
