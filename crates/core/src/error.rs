//! Domain error model.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::id::{BranchId, ItemId, UserId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Variants carry enough context (item, branch, quantities, holder) for a UI
/// collaborator to explain the condition without reaching into storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. zero delta, missing shelf).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// Stale version / optimistic concurrency failure. Callers re-fetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The allocator could not satisfy the full request; nothing was debited.
    #[error(
        "insufficient stock for item {item_id} at branch {branch_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        item_id: ItemId,
        branch_id: BranchId,
        requested: i64,
        available: i64,
    },

    /// A non-terminal stock-take session already exists for the branch.
    #[error("branch {branch_id} already has an open stock-take session ({existing})")]
    SessionConflict { branch_id: BranchId, existing: String },

    /// Another counter holds the item lease.
    #[error("item {item_id} is being counted by {holder} until {expires_at}")]
    LockHeld {
        item_id: ItemId,
        holder: UserId,
        expires_at: DateTime<Utc>,
    },

    /// Completion is blocked until these shelves are fully approved.
    #[error("unresolved counts on shelves: {}", .shelves.join(", "))]
    UnresolvedCounts { shelves: Vec<String> },

    /// The session state machine does not allow this action from its current status.
    #[error("cannot {action} a session in status {from}")]
    InvalidTransition { from: String, action: String },

    /// Draft or open sales/purchase documents exist for the branch.
    #[error("branch {branch_id} has open documents: {}", .open_documents.join(", "))]
    BranchNotQuiescent {
        branch_id: BranchId,
        open_documents: Vec<String>,
    },

    /// Authorization failure at the domain boundary (e.g. counter not allowed).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            action: action.into(),
        }
    }

    /// Whether retrying the same call later may succeed without user input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::LockHeld { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_carries_quantities() {
        let err = DomainError::InsufficientStock {
            item_id: ItemId::new(),
            branch_id: BranchId::new(),
            requested: 100,
            available: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 100"));
        assert!(msg.contains("available 8"));
    }

    #[test]
    fn unresolved_counts_lists_shelves() {
        let err = DomainError::UnresolvedCounts {
            shelves: vec!["A1".to_string(), "B2".to_string()],
        };
        assert_eq!(err.to_string(), "unresolved counts on shelves: A1, B2");
    }

    #[test]
    fn only_conflicts_and_held_locks_are_retryable() {
        assert!(DomainError::conflict("stale").is_retryable());
        assert!(!DomainError::validation("zero delta").is_retryable());
    }
}
