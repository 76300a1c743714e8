//! Read-only ledger queries for reporting collaborators.
//!
//! Company-scoped and paginated by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{BranchId, CompanyId, ItemId};
use rxstock_ledger::{LedgerEntry, TransactionType};

use super::r#trait::LedgerStoreError;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub branch_id: Option<BranchId>,
    pub item_id: Option<ItemId>,
    pub batch_number: Option<String>,
    pub transaction_type: Option<TransactionType>,
    /// Inclusive lower bound on `created_at`.
    pub occurred_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub occurred_before: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.branch_id.is_none_or(|b| entry.branch_id == b)
            && self.item_id.is_none_or(|i| entry.item_id == i)
            && self
                .batch_number
                .as_deref()
                .is_none_or(|b| entry.batch_number.as_deref() == Some(b))
            && self.transaction_type.is_none_or(|t| entry.transaction_type == t)
            && self.occurred_after.is_none_or(|t| entry.created_at >= t)
            && self.occurred_before.is_none_or(|t| entry.created_at <= t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl LedgerPage {
    pub fn new(entries: Vec<LedgerEntry>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}

/// Time-range queries over the ledger.
///
/// Results are ordered by `created_at` ascending, then by stream sequence.
#[async_trait::async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn query_entries(
        &self,
        company_id: CompanyId,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError>;
}
