use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{
    BranchId, CompanyId, DomainError, DomainResult, ItemId, OrderBookEntryId, SupplierId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderReason {
    AutoThreshold,
    ManualRequest,
    ManualShortage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Ordered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Ordered => "ORDERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory purchasing row. At most one PENDING row per (branch, item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub id: OrderBookEntryId,
    pub company_id: CompanyId,
    pub branch_id: BranchId,
    pub item_id: ItemId,
    pub supplier_id: Option<SupplierId>,
    pub quantity_needed: i64,
    pub reason: OrderReason,
    pub status: OrderStatus,
    pub requested_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderBookEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: OrderBookEntryId,
        company_id: CompanyId,
        branch_id: BranchId,
        item_id: ItemId,
        supplier_id: Option<SupplierId>,
        quantity_needed: i64,
        reason: OrderReason,
        requested_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity_needed <= 0 {
            return Err(DomainError::validation("quantity_needed must be positive"));
        }
        Ok(Self {
            id,
            company_id,
            branch_id,
            item_id,
            supplier_id,
            quantity_needed,
            reason,
            status: OrderStatus::Pending,
            requested_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fold a new proposal into this PENDING row: keep the larger quantity.
    ///
    /// Returns whether the row changed.
    pub fn merge(&mut self, quantity_needed: i64, supplier_id: Option<SupplierId>, now: DateTime<Utc>) -> DomainResult<bool> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invalid_transition(self.status, "merge into"));
        }
        let mut changed = false;
        if quantity_needed > self.quantity_needed {
            self.quantity_needed = quantity_needed;
            changed = true;
        }
        if self.supplier_id.is_none() && supplier_id.is_some() {
            self.supplier_id = supplier_id;
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        Ok(changed)
    }

    pub fn mark_ordered(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.leave_pending(OrderStatus::Ordered, "order", now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.leave_pending(OrderStatus::Cancelled, "cancel", now)
    }

    fn leave_pending(&mut self, to: OrderStatus, action: &str, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invalid_transition(self.status, action));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
