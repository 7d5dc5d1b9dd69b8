//! Audit entries for review transitions.
//!
//! The audit log is append-only. One entry per applied transition,
//! written in the same transaction as the status change.

use crate::{review::ReviewStatus, types::{ActorId, RecordId, TenantId}};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    /// e.g. `"review.dismissed"`.
    pub action: String,
    pub record_id: RecordId,
    pub actor_id: ActorId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn review_transition(
        tenant_id: &str,
        record_id: &str,
        actor_id: &str,
        from: ReviewStatus,
        to: ReviewStatus,
        notes: Option<&str>,
        bulk: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            action: format!("review.{to}"),
            record_id: record_id.to_string(),
            actor_id: actor_id.to_string(),
            payload: json!({
                "from_status": from.as_str(),
                "to_status": to.as_str(),
                "notes": notes,
                "bulk": bulk,
            }),
            created_at: at,
        }
    }

    pub fn from_status(&self) -> Option<&str> {
        self.payload.get("from_status").and_then(|v| v.as_str())
    }

    pub fn to_status(&self) -> Option<&str> {
        self.payload.get("to_status").and_then(|v| v.as_str())
    }
}
