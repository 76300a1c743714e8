use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use rxstock_core::{BranchId, CompanyId, DomainError, EntryId, ExpectedVersion, ItemId};
use rxstock_ledger::{LedgerEntry, NewLedgerEntry, StockKey};

use super::query::LedgerQuery;

/// Ledger store operation error.
///
/// These are **infrastructure errors**. Entry validation failures are carried
/// as `Rejected` with the domain error intact so callers can surface them.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The stream moved since the caller read it.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The batch itself is malformed (empty, mixed streams).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// An entry failed domain validation; nothing was written.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Append-only, company-scoped stock ledger.
///
/// ## Append semantics
///
/// `append()`:
/// - requires every entry to target the same (company, branch, item) stream
/// - validates each entry and computes its `total_cost`
/// - checks `expected_version` against the stream's last sequence
/// - assigns sequences starting at `current + 1`
/// - persists the whole batch or nothing
///
/// ## Load semantics
///
/// `load_stream()` returns entries in sequence order, or an empty vector for
/// a stream that has never been written.
pub trait LedgerStore: Send + Sync {
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    fn load_stream(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    fn find_entry(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError>;

    /// Items that have at least one entry at the branch.
    fn items_at_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<BTreeSet<ItemId>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).append(entries, expected_version)
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).load_stream(key)
    }

    fn find_entry(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        (**self).find_entry(company_id, entry_id)
    }

    fn items_at_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<BTreeSet<ItemId>, LedgerStoreError> {
        (**self).items_at_branch(company_id, branch_id)
    }
}

/// A ledger backend usable by the services: writes plus reporting queries.
pub trait LedgerBackend: LedgerStore + LedgerQuery {}

impl<T> LedgerBackend for T where T: LedgerStore + LedgerQuery {}

/// Common batch check shared by the backends: non-empty, single stream.
pub(crate) fn stream_of(entries: &[NewLedgerEntry]) -> Result<StockKey, LedgerStoreError> {
    let Some(first) = entries.first() else {
        return Err(LedgerStoreError::InvalidAppend("empty batch".to_string()));
    };
    let key = first.key;
    if let Some(idx) = entries.iter().position(|e| e.key != key) {
        return Err(LedgerStoreError::InvalidAppend(format!(
            "batch contains multiple streams (index {idx})"
        )));
    }
    Ok(key)
}
