//! Shared primitive types used across the entire crate.

/// The tenant every config row, ledger row and audit row is scoped to.
pub type TenantId = String;

/// Identifier of an expense in the upstream expense store.
pub type ExpenseId = String;

/// Identifier of a review ledger row.
pub type RecordId = String;

/// Identity of whoever performed a review or config change.
pub type ActorId = String;
