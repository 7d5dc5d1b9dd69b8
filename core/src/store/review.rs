//! Review ledger and audit log queries.

use super::{decimal_column, SentinelStore};
use crate::{
    audit::AuditEntry,
    error::SentinelResult,
    expense::ExpenseSummary,
    finding::{Finding, RuleType, Severity},
    review::{CreateOutcome, ReviewFilter, ReviewRecord, ReviewStats, ReviewStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const REVIEW_COLUMNS: &str = "record_id, tenant_id, expense_id, rule_type, severity, status,
    description, details, reviewed_by, reviewed_at, resolution_notes,
    expense_description, expense_amount, expense_date, submitter_name, category_name,
    created_at, updated_at";

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewRecord> {
    Ok(ReviewRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        expense_id: row.get(2)?,
        rule_type: row.get(3)?,
        severity: row.get(4)?,
        status: row.get(5)?,
        description: row.get(6)?,
        details: row.get(7)?,
        reviewed_by: row.get(8)?,
        reviewed_at: row.get(9)?,
        resolution_notes: row.get(10)?,
        expense: ExpenseSummary {
            description: row.get(11)?,
            amount: decimal_column(row, 12)?,
            expense_date: row.get(13)?,
            submitter_name: row.get(14)?,
            category_name: row.get(15)?,
        },
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

impl SentinelStore {
    // ── Review records ─────────────────────────────────────────

    /// Insert a pending record for the finding's (expense, rule type) pair
    /// unless one already exists. Existing rows are never touched.
    pub fn create_review_if_absent(
        &self,
        tenant_id: &str,
        finding: &Finding,
        now: DateTime<Utc>,
    ) -> SentinelResult<CreateOutcome> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let inserted = self.conn.execute(
            "INSERT INTO review_record
             (record_id, tenant_id, expense_id, rule_type, severity, status,
              description, details,
              expense_description, expense_amount, expense_date, submitter_name, category_name,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
             ON CONFLICT (tenant_id, expense_id, rule_type) DO NOTHING",
            params![
                record_id,
                tenant_id,
                finding.expense_id,
                finding.rule_type,
                finding.severity,
                finding.description,
                finding.details,
                finding.expense.description,
                finding.expense.amount.to_string(),
                finding.expense.expense_date,
                finding.expense.submitter_name,
                finding.expense.category_name,
                now,
            ],
        )?;
        if inserted == 1 {
            log::debug!(
                "tenant={tenant_id} review {record_id} created for ({}, {})",
                finding.expense_id,
                finding.rule_type
            );
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::Existing)
        }
    }

    pub fn review_record(
        &self,
        tenant_id: &str,
        record_id: &str,
    ) -> SentinelResult<Option<ReviewRecord>> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM review_record WHERE tenant_id = ?1 AND record_id = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![tenant_id, record_id], review_from_row)
            .optional()?)
    }

    pub fn review_record_for_pair(
        &self,
        tenant_id: &str,
        expense_id: &str,
        rule_type: RuleType,
    ) -> SentinelResult<Option<ReviewRecord>> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM review_record
             WHERE tenant_id = ?1 AND expense_id = ?2 AND rule_type = ?3"
        );
        Ok(self
            .conn
            .query_row(&sql, params![tenant_id, expense_id, rule_type], review_from_row)
            .optional()?)
    }

    /// Records matching `filter`, highest severity first, then oldest first.
    pub fn review_records(
        &self,
        tenant_id: &str,
        filter: ReviewFilter,
    ) -> SentinelResult<Vec<ReviewRecord>> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM review_record
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR severity = ?3)
             ORDER BY CASE severity WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
                      created_at ASC, record_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![tenant_id, filter.status, filter.severity],
            review_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Conditional update: only applies while the row is still `from`.
    /// Returns false when another writer got there first.
    #[allow(clippy::too_many_arguments)]
    pub fn update_review_status(
        &self,
        tenant_id: &str,
        record_id: &str,
        from: ReviewStatus,
        to: ReviewStatus,
        actor_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> SentinelResult<bool> {
        let changed = self.conn.execute(
            "UPDATE review_record
             SET status = ?4, reviewed_by = ?5, reviewed_at = ?6,
                 resolution_notes = ?7, updated_at = ?6
             WHERE tenant_id = ?1 AND record_id = ?2 AND status = ?3",
            params![tenant_id, record_id, from, to, actor_id, now, notes],
        )?;
        Ok(changed == 1)
    }

    pub fn review_stats(&self, tenant_id: &str) -> SentinelResult<ReviewStats> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM review_record WHERE tenant_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((row.get::<_, ReviewStatus>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = ReviewStats::default();
        for row in rows {
            let (status, count) = row?;
            stats.by_status.insert(status, count);
        }
        stats.high_pending = self.conn.query_row(
            "SELECT COUNT(*) FROM review_record
             WHERE tenant_id = ?1 AND status = ?2 AND severity = ?3",
            params![tenant_id, ReviewStatus::Pending, Severity::High],
            |row| row.get(0),
        )?;
        Ok(stats)
    }

    // ── Audit log ──────────────────────────────────────────────

    pub fn append_audit_entry(&self, entry: &AuditEntry) -> SentinelResult<()> {
        self.conn.execute(
            "INSERT INTO audit_log (tenant_id, action, record_id, actor_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.tenant_id,
                entry.action,
                entry.record_id,
                entry.actor_id,
                serde_json::to_string(&entry.payload)?,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Audit history of one record, oldest first.
    pub fn audit_entries(&self, tenant_id: &str, record_id: &str) -> SentinelResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, action, record_id, actor_id, payload, created_at
             FROM audit_log WHERE tenant_id = ?1 AND record_id = ?2
             ORDER BY audit_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id, record_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, DateTime<Utc>>(5)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (tenant_id, action, record_id, actor_id, payload, created_at) = row?;
            entries.push(AuditEntry {
                tenant_id,
                action,
                record_id,
                actor_id,
                payload: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(entries)
    }
}
