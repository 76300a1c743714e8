use thiserror::Error;

use rxstock_core::{BranchId, CompanyId, CountId, DomainError, ExpectedVersion, ItemId, SessionId, UserId};
use rxstock_events::EventEnvelope;
use rxstock_stocktake::{Adjustment, Count, SessionEvent, StockTakeSession};

/// Stream type recorded on session history envelopes.
pub const SESSION_STREAM_TYPE: &str = "stocktake.session";

#[derive(Debug, Error)]
pub enum StockTakeStoreError {
    /// The row moved since the caller read it.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A uniqueness rule was hit (count per counter, adjustment per item, session code).
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A business rule enforced by the store itself (one open session per branch).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Version check shared by the backends.
pub(crate) fn check_version(
    what: &str,
    expected: ExpectedVersion,
    current: u64,
) -> Result<(), StockTakeStoreError> {
    if expected.matches(current) {
        Ok(())
    } else {
        Err(StockTakeStoreError::Concurrency(format!(
            "{what}: expected {expected:?}, found {current}"
        )))
    }
}

/// Session snapshots plus their event history.
pub trait SessionStore: Send + Sync {
    /// Persist `session` after `events` were applied to it.
    ///
    /// `expected` is checked against the stored version (0 when absent).
    /// Saving an open session fails with `SessionConflict` when another open
    /// session exists for the branch.
    fn save(
        &self,
        session: &StockTakeSession,
        events: &[SessionEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StockTakeStoreError>;

    fn get(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError>;

    fn open_for_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError>;

    fn code_exists(&self, company_id: CompanyId, code: &str) -> Result<bool, StockTakeStoreError>;

    fn history(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Vec<EventEnvelope<SessionEvent>>, StockTakeStoreError>;
}

/// Counts, unique per (session, item, counter).
pub trait CountStore: Send + Sync {
    /// Insert or replace a count, checking `expected` against the stored version.
    fn upsert(&self, count: Count, expected: ExpectedVersion) -> Result<(), StockTakeStoreError>;

    fn get(&self, count_id: CountId) -> Result<Option<Count>, StockTakeStoreError>;

    fn find(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
    ) -> Result<Option<Count>, StockTakeStoreError>;

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Count>, StockTakeStoreError>;

    /// Replace several counts at once; each pair carries the version it was read at.
    fn update_many(&self, counts: Vec<(Count, u64)>) -> Result<(), StockTakeStoreError>;

    /// Drop all counts of a cancelled session. Returns how many were removed.
    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError>;
}

/// Reconciliation adjustments, unique per (session, item).
pub trait AdjustmentStore: Send + Sync {
    fn insert(&self, adjustment: Adjustment) -> Result<(), StockTakeStoreError>;

    fn get(
        &self,
        session_id: SessionId,
        item_id: ItemId,
    ) -> Result<Option<Adjustment>, StockTakeStoreError>;

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Adjustment>, StockTakeStoreError>;

    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError>;
}
