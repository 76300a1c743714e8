use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{BranchId, CompanyId, ItemId};
use rxstock_ledger::{LedgerEntry, TransactionType};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Balance and trailing sales of one item at a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStock {
    pub item_id: ItemId,
    pub balance: i64,
    /// Base units sold inside the window, net of sale returns (never negative).
    pub sales_units: i64,
    pub pack_size: Option<i64>,
}

impl ItemStock {
    /// Fold one item's ledger stream.
    ///
    /// Balance covers the whole stream; sales only SALE entries with
    /// `window_start <= created_at <= as_of`.
    pub fn from_entries(
        item_id: ItemId,
        entries: &[LedgerEntry],
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Self {
        let balance = entries.iter().map(|e| e.quantity_delta).sum();
        let sold: i64 = entries
            .iter()
            .filter(|e| e.transaction_type == TransactionType::Sale)
            .filter(|e| e.created_at >= window_start && e.created_at <= as_of)
            .map(|e| -e.quantity_delta)
            .sum();

        Self {
            item_id,
            balance,
            sales_units: sold.max(0),
            pack_size: None,
        }
    }

    pub fn with_pack_size(mut self, pack_size: Option<i64>) -> Self {
        self.pack_size = pack_size.filter(|p| *p > 0);
        self
    }
}

/// Point-in-time input for one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStockSnapshot {
    pub company_id: CompanyId,
    pub branch_id: BranchId,
    pub as_of: DateTime<Utc>,
    pub window_days: i64,
    pub items: Vec<ItemStock>,
}

impl BranchStockSnapshot {
    pub fn new(company_id: CompanyId, branch_id: BranchId, as_of: DateTime<Utc>, window_days: i64) -> Self {
        Self {
            company_id,
            branch_id,
            as_of,
            window_days,
            items: Vec::new(),
        }
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.as_of - Duration::days(self.window_days)
    }

    pub fn push(&mut self, item: ItemStock) {
        self.items.push(item);
    }
}
