//! Alert delivery log.

use super::SentinelStore;
use crate::error::SentinelResult;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationLogRow {
    pub notification_id: String,
    pub tenant_id: String,
    pub recipient_id: String,
    pub recipient_address: String,
    /// `"sent"` or `"failed"`.
    pub status: String,
    pub failure_reason: Option<String>,
    pub finding_count: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationLogRow {
    pub fn is_sent(&self) -> bool {
        self.status == "sent"
    }
}

impl SentinelStore {
    pub fn insert_notification_log(&self, row: &NotificationLogRow) -> SentinelResult<()> {
        self.conn.execute(
            "INSERT INTO notification_log
             (notification_id, tenant_id, recipient_id, recipient_address, status,
              failure_reason, finding_count, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.notification_id,
                row.tenant_id,
                row.recipient_id,
                row.recipient_address,
                row.status,
                row.failure_reason,
                row.finding_count,
                row.payload,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    /// Every delivery attempt for the tenant, oldest first.
    pub fn notification_log(&self, tenant_id: &str) -> SentinelResult<Vec<NotificationLogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT notification_id, tenant_id, recipient_id, recipient_address, status,
                    failure_reason, finding_count, payload, created_at
             FROM notification_log WHERE tenant_id = ?1
             ORDER BY created_at ASC, recipient_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok(NotificationLogRow {
                notification_id: row.get(0)?,
                tenant_id: row.get(1)?,
                recipient_id: row.get(2)?,
                recipient_address: row.get(3)?,
                status: row.get(4)?,
                failure_reason: row.get(5)?,
                finding_count: row.get(6)?,
                payload: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
