//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Domain modules call store methods — they never execute SQL directly.

mod config;
mod expense;
mod notification;
mod review;

pub use notification::NotificationLogRow;

use crate::{
    error::SentinelResult,
    finding::{RuleType, Severity},
    review::ReviewStatus,
};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef},
    Connection, Row, ToSql,
};
use rust_decimal::Decimal;
use std::time::Duration;

/// How long a connection waits on another writer before SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SentinelStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or URI
}

impl SentinelStore {
    pub fn open(path: &str) -> SentinelResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open a private in-memory database (used in tests).
    pub fn in_memory() -> SentinelResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// URI of a named in-memory database that every connection in this
    /// process can share, as long as one connection stays open.
    pub fn shared_memory_uri(name: &str) -> String {
        format!("file:{name}?mode=memory&cache=shared")
    }

    /// Reopen a new connection to the same database.
    /// For private in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based and shared-memory databases, this opens the same database.
    pub fn reopen(&self) -> SentinelResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> SentinelResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_expenses.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_detection_config.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_review_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_notification_log.sql"))?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────

    /// Run `f` inside an IMMEDIATE transaction. Commits on `Ok`,
    /// rolls back on `Err` (including a failed commit).
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Self) -> SentinelResult<T>,
    ) -> SentinelResult<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f(self).and_then(|value| {
            self.conn.execute_batch("COMMIT")?;
            Ok(value)
        });
        if result.is_err() && !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        result
    }

    /// Run `f` inside a savepoint of the current transaction. On `Err`
    /// only the savepoint's writes are undone; the outer transaction
    /// stays usable.
    pub fn savepoint<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Self) -> SentinelResult<T>,
    ) -> SentinelResult<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
                Err(e)
            }
        }
    }

    /// Test helper: run raw SQL against this connection.
    pub fn execute_batch(&self, sql: &str) -> SentinelResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

// ── Column helpers ─────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("unrecognised value '{0}'")]
struct UnknownVariant(String);

/// Text-backed enums stored by their `as_str()` name.
macro_rules! sql_text_enum {
    ($($ty:ty),* $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).ok_or_else(|| FromSqlError::Other(Box::new(UnknownVariant(s.to_string()))))
            }
        }
    )*};
}

sql_text_enum!(RuleType, Severity, ReviewStatus);

/// Decimals are stored as text to keep them exact.
fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
