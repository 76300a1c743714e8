use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use rxstock_core::{BranchId, CompanyId, DomainError, ItemId, OrderBookEntryId, UserId};
use rxstock_ledger::StockKey;
use rxstock_reorder::{
    BranchStockSnapshot, DEFAULT_WINDOW_DAYS, ItemStock, OrderBookEntry, OrderReason, OrderStatus,
    ReorderJob, ReorderRun,
};

use crate::ledger_store::LedgerBackend;
use crate::order_book::{InMemoryOrderBookStore, OrderBookStore, Upserted};
use crate::ports::Catalog;

use super::ServiceResult;

/// One threshold run and the order-book rows it produced or touched.
#[derive(Debug, Clone)]
pub struct ReorderOutcome {
    pub run: ReorderRun,
    pub entries: Vec<OrderBookEntry>,
}

/// Advisory restocking over ledger snapshots. Never writes stock movements.
#[derive(Clone)]
pub struct ReorderService {
    ledger: Arc<dyn LedgerBackend>,
    catalog: Arc<dyn Catalog>,
    book: Arc<dyn OrderBookStore>,
    window_days: i64,
}

impl ReorderService {
    pub fn new(ledger: Arc<dyn LedgerBackend>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            ledger,
            catalog,
            book: Arc::new(InMemoryOrderBookStore::new()),
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_order_book(mut self, book: Arc<dyn OrderBookStore>) -> Self {
        self.book = book;
        self
    }

    pub fn with_window_days(mut self, window_days: i64) -> Self {
        self.window_days = window_days;
        self
    }

    fn snapshot(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        now: DateTime<Utc>,
    ) -> ServiceResult<BranchStockSnapshot> {
        let mut snapshot = BranchStockSnapshot::new(company_id, branch_id, now, self.window_days);
        let window_start = snapshot.window_start();

        for item_id in self.ledger.items_at_branch(company_id, branch_id)? {
            let entries = self
                .ledger
                .load_stream(StockKey::new(company_id, branch_id, item_id))?;
            let pack_size = self
                .catalog
                .item(company_id, item_id)
                .and_then(|p| p.pack_size);
            snapshot.push(
                ItemStock::from_entries(item_id, &entries, window_start, now).with_pack_size(pack_size),
            );
        }
        Ok(snapshot)
    }

    /// Propose restocking for every item with history at the branch.
    ///
    /// Re-running merges into the existing PENDING rows.
    #[instrument(skip(self), fields(company = %company_id, branch = %branch_id), err)]
    pub fn run(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReorderOutcome> {
        let run = ReorderJob::new(self.snapshot(company_id, branch_id, now)?).run()?;

        let mut entries = Vec::with_capacity(run.proposals.len());
        let (mut inserted, mut merged) = (0usize, 0usize);
        for proposal in &run.proposals {
            let supplier = self
                .catalog
                .item(company_id, proposal.item_id)
                .and_then(|p| p.preferred_supplier);
            let candidate = OrderBookEntry::pending(
                OrderBookEntryId::new(),
                company_id,
                branch_id,
                proposal.item_id,
                supplier,
                proposal.quantity_needed,
                OrderReason::AutoThreshold,
                None,
                now,
            )?;
            match self.book.upsert_pending(candidate, now)? {
                Upserted::Inserted(entry) => {
                    inserted += 1;
                    entries.push(entry);
                }
                Upserted::Merged { entry, .. } => {
                    merged += 1;
                    entries.push(entry);
                }
            }
        }

        info!(inserted, merged, "{}", run.explanation);
        Ok(ReorderOutcome { run, entries })
    }

    /// Manual order-book request from a user.
    #[instrument(skip(self), fields(company = %company_id, branch = %branch_id, item = %item_id), err)]
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        item_id: ItemId,
        quantity: i64,
        reason: OrderReason,
        requested_by: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<OrderBookEntry> {
        if reason == OrderReason::AutoThreshold {
            return Err(DomainError::validation("manual requests need a manual reason").into());
        }
        if !self.catalog.branch_exists(company_id, branch_id) {
            return Err(DomainError::validation(format!("unknown branch {branch_id}")).into());
        }
        let profile = self
            .catalog
            .item(company_id, item_id)
            .ok_or_else(|| DomainError::validation(format!("unknown item {item_id}")))?;

        let candidate = OrderBookEntry::pending(
            OrderBookEntryId::new(),
            company_id,
            branch_id,
            item_id,
            profile.preferred_supplier,
            quantity,
            reason,
            Some(requested_by),
            now,
        )?;
        Ok(self.book.upsert_pending(candidate, now)?.entry().clone())
    }

    fn transition<F>(&self, company_id: CompanyId, id: OrderBookEntryId, apply: F) -> ServiceResult<OrderBookEntry>
    where
        F: FnOnce(&mut OrderBookEntry) -> Result<(), DomainError>,
    {
        let mut entry = self
            .book
            .get(company_id, id)?
            .ok_or_else(|| DomainError::not_found(format!("order book entry {id}")))?;
        apply(&mut entry)?;
        self.book.save(entry.clone())?;
        Ok(entry)
    }

    pub fn mark_ordered(
        &self,
        company_id: CompanyId,
        id: OrderBookEntryId,
        now: DateTime<Utc>,
    ) -> ServiceResult<OrderBookEntry> {
        self.transition(company_id, id, |e| e.mark_ordered(now))
    }

    pub fn cancel(
        &self,
        company_id: CompanyId,
        id: OrderBookEntryId,
        now: DateTime<Utc>,
    ) -> ServiceResult<OrderBookEntry> {
        self.transition(company_id, id, |e| e.cancel(now))
    }

    pub fn list(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        status: Option<OrderStatus>,
    ) -> ServiceResult<Vec<OrderBookEntry>> {
        Ok(self.book.list(company_id, branch_id, status)?)
    }
}
