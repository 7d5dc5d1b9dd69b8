use crate::{finding::RuleType, review::ReviewStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid detection config: {field} {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    #[error("Expense snapshot unavailable: {reason}")]
    SnapshotUnavailable { reason: String },

    #[error("Ledger conflict on ({expense_id}, {rule_type})")]
    LedgerConflict { expense_id: String, rule_type: RuleType },

    #[error("Transition rejected: review record '{record_id}' is already {status}")]
    TransitionRejected { record_id: String, status: ReviewStatus },

    #[error("Review action '{action}' needs a reviewer identity")]
    ActorRequired { action: &'static str },

    #[error("Review record '{record_id}' not found")]
    RecordNotFound { record_id: String },

    #[error("Audit write failed for review record '{record_id}': {reason}")]
    AuditWriteFailed { record_id: String, reason: String },

    #[error("Alert delivery to '{recipient_id}' failed: {reason}")]
    AlertDeliveryFailed { recipient_id: String, reason: String },

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: &'static str, elapsed_ms: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SentinelError {
    /// Busy/locked errors from a concurrent writer. Worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SentinelError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Unique/primary-key violation, i.e. someone else created the row first.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SentinelError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type SentinelResult<T> = Result<T, SentinelError>;
