//! Order book storage.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use rxstock_core::{BranchId, CompanyId, DomainError, OrderBookEntryId};
use rxstock_reorder::{OrderBookEntry, OrderStatus};

#[derive(Debug, Error)]
pub enum OrderBookStoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result of folding a proposal into the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Inserted(OrderBookEntry),
    /// An existing PENDING row absorbed the proposal (`changed` if it moved).
    Merged { entry: OrderBookEntry, changed: bool },
}

impl Upserted {
    pub fn entry(&self) -> &OrderBookEntry {
        match self {
            Upserted::Inserted(entry) | Upserted::Merged { entry, .. } => entry,
        }
    }
}

pub trait OrderBookStore: Send + Sync {
    /// Insert `candidate` unless a PENDING row exists for its (company, branch,
    /// item); in that case merge into it. Atomic.
    fn upsert_pending(
        &self,
        candidate: OrderBookEntry,
        now: DateTime<Utc>,
    ) -> Result<Upserted, OrderBookStoreError>;

    fn get(
        &self,
        company_id: CompanyId,
        id: OrderBookEntryId,
    ) -> Result<Option<OrderBookEntry>, OrderBookStoreError>;

    /// Overwrite an existing row.
    fn save(&self, entry: OrderBookEntry) -> Result<(), OrderBookStoreError>;

    fn list(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderBookEntry>, OrderBookStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryOrderBookStore {
    rows: RwLock<HashMap<OrderBookEntryId, OrderBookEntry>>,
}

impl InMemoryOrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> OrderBookStoreError {
    OrderBookStoreError::Storage("lock poisoned".to_string())
}

impl OrderBookStore for InMemoryOrderBookStore {
    fn upsert_pending(
        &self,
        candidate: OrderBookEntry,
        now: DateTime<Utc>,
    ) -> Result<Upserted, OrderBookStoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;

        let existing = rows.values_mut().find(|r| {
            r.status == OrderStatus::Pending
                && r.company_id == candidate.company_id
                && r.branch_id == candidate.branch_id
                && r.item_id == candidate.item_id
        });
        if let Some(row) = existing {
            let changed = row.merge(candidate.quantity_needed, candidate.supplier_id, now)?;
            return Ok(Upserted::Merged {
                entry: row.clone(),
                changed,
            });
        }

        rows.insert(candidate.id, candidate.clone());
        Ok(Upserted::Inserted(candidate))
    }

    fn get(
        &self,
        company_id: CompanyId,
        id: OrderBookEntryId,
    ) -> Result<Option<OrderBookEntry>, OrderBookStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&id).filter(|r| r.company_id == company_id).cloned())
    }

    fn save(&self, entry: OrderBookEntry) -> Result<(), OrderBookStoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(&entry.id) {
            Some(row) if row.company_id == entry.company_id => {
                *row = entry;
                Ok(())
            }
            _ => Err(OrderBookStoreError::NotFound(format!("order book entry {}", entry.id))),
        }
    }

    fn list(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderBookEntry>, OrderBookStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut listed: Vec<OrderBookEntry> = rows
            .values()
            .filter(|r| r.company_id == company_id && r.branch_id == branch_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxstock_core::{ItemId, SupplierId};
    use rxstock_reorder::OrderReason;

    fn pending(company: CompanyId, branch: BranchId, item: ItemId, qty: i64) -> OrderBookEntry {
        OrderBookEntry::pending(
            OrderBookEntryId::new(),
            company,
            branch,
            item,
            None,
            qty,
            OrderReason::AutoThreshold,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn second_proposal_merges_into_the_pending_row() {
        let store = InMemoryOrderBookStore::new();
        let (c, b, i) = (CompanyId::new(), BranchId::new(), ItemId::new());

        let first = store.upsert_pending(pending(c, b, i, 50), Utc::now()).unwrap();
        assert!(matches!(first, Upserted::Inserted(_)));

        let mut bigger = pending(c, b, i, 60);
        bigger.supplier_id = Some(SupplierId::new());
        let second = store.upsert_pending(bigger, Utc::now()).unwrap();
        assert!(matches!(second, Upserted::Merged { changed: true, .. }));
        assert_eq!(second.entry().id, first.entry().id);
        assert_eq!(second.entry().quantity_needed, 60);
        assert!(second.entry().supplier_id.is_some());

        assert_eq!(store.list(c, b, Some(OrderStatus::Pending)).unwrap().len(), 1);
    }

    #[test]
    fn ordered_rows_do_not_absorb_new_proposals() {
        let store = InMemoryOrderBookStore::new();
        let (c, b, i) = (CompanyId::new(), BranchId::new(), ItemId::new());

        let mut row = store
            .upsert_pending(pending(c, b, i, 10), Utc::now())
            .unwrap()
            .entry()
            .clone();
        row.mark_ordered(Utc::now()).unwrap();
        store.save(row).unwrap();

        let next = store.upsert_pending(pending(c, b, i, 10), Utc::now()).unwrap();
        assert!(matches!(next, Upserted::Inserted(_)));
        assert_eq!(store.list(c, b, None).unwrap().len(), 2);
        assert!(store.get(CompanyId::new(), next.entry().id).unwrap().is_none());
    }
}
