use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use rxstock_core::{CompanyId, DomainError, EntryId, ExpectedVersion, UserId};
use rxstock_ledger::{
    AllocationLine, Batch, LedgerEntry, NewLedgerEntry, REF_CORRECTION, REF_SALE_RETURN, Reference,
    StockKey, StockPosition, TransactionType, plan_fefo,
};

use crate::ledger_store::{LedgerBackend, LedgerFilter, LedgerPage, LedgerStoreError, Pagination};
use crate::ports::{Catalog, ItemProfile};

use super::{ServiceError, ServiceResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A sale or transfer to satisfy from the item's batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub key: StockKey,
    pub quantity: i64,
    pub unit: String,
    pub transaction_type: TransactionType,
    pub reference: Reference,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// FEFO order.
    pub lines: Vec<AllocationLine>,
    pub entries: Vec<LedgerEntry>,
}

/// A customer return put back into a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReturn {
    pub key: StockKey,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: i64,
    pub unit: String,
    /// The sales document being returned against.
    pub sale_reference: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Ledger writes and reads for sales, purchasing and reporting collaborators.
#[derive(Clone)]
pub struct InventoryService {
    ledger: Arc<dyn LedgerBackend>,
    catalog: Arc<dyn Catalog>,
    max_retries: u32,
}

impl InventoryService {
    pub fn new(ledger: Arc<dyn LedgerBackend>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            ledger,
            catalog,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn profile(&self, key: &StockKey) -> ServiceResult<ItemProfile> {
        if !self.catalog.branch_exists(key.company_id, key.branch_id) {
            return Err(DomainError::validation(format!("unknown branch {}", key.branch_id)).into());
        }
        self.catalog
            .item(key.company_id, key.item_id)
            .ok_or_else(|| DomainError::validation(format!("unknown item {}", key.item_id)).into())
    }

    fn append_one(&self, entry: NewLedgerEntry, expected: ExpectedVersion) -> ServiceResult<LedgerEntry> {
        self.ledger
            .append(vec![entry], expected)?
            .pop()
            .ok_or_else(|| ServiceError::Storage("append returned no entry".to_string()))
    }

    /// Record a purchase, opening balance or manual movement.
    #[instrument(
        skip(self, entry),
        fields(stream = %entry.key, tx = %entry.transaction_type, delta = entry.quantity_delta),
        err
    )]
    pub fn append(&self, entry: NewLedgerEntry) -> ServiceResult<LedgerEntry> {
        self.profile(&entry.key)?;
        let committed = self.append_one(entry, ExpectedVersion::Any)?;
        debug!(entry_id = %committed.id, sequence = committed.sequence, "ledger entry appended");
        Ok(committed)
    }

    pub fn position(&self, key: StockKey) -> ServiceResult<StockPosition> {
        let entries = self.ledger.load_stream(key)?;
        Ok(StockPosition::from_entries(&entries))
    }

    pub fn balance_of(&self, key: StockKey) -> ServiceResult<i64> {
        Ok(self.position(key)?.balance())
    }

    /// Batches in FEFO order, depleted ones included.
    pub fn batches_of(&self, key: StockKey) -> ServiceResult<Vec<Batch>> {
        Ok(self.position(key)?.batches().to_vec())
    }

    /// Debit `quantity` from the item's batches, earliest expiry first.
    ///
    /// The plan is written against the stream version it was computed from.
    /// Losing that race re-reads and re-plans, up to `max_retries` times.
    #[instrument(skip(self, request), fields(stream = %request.key, quantity = request.quantity, unit = %request.unit))]
    pub fn allocate(&self, request: AllocationRequest) -> ServiceResult<Allocation> {
        if !matches!(
            request.transaction_type,
            TransactionType::Sale | TransactionType::Transfer
        ) {
            return Err(DomainError::validation(format!(
                "cannot allocate a {} movement",
                request.transaction_type
            ))
            .into());
        }
        if request.quantity <= 0 {
            return Err(DomainError::validation("allocation quantity must be positive").into());
        }

        let profile = self.profile(&request.key)?;
        let requested = profile.units.to_base(request.quantity, &request.unit)?;
        let today = request.occurred_at.date_naive();

        let mut last_race = String::new();
        for attempt in 0..=self.max_retries {
            let position = self.position(request.key)?;
            let lines = match plan_fefo(&request.key, &position, requested) {
                Ok(lines) => lines,
                Err(err) => {
                    debug!(error = %err, "allocation refused");
                    return Err(err.into());
                }
            };

            for line in lines.iter().filter(|l| l.expiry_date.is_some_and(|d| d < today)) {
                warn!(
                    batch = line.batch_number.as_deref().unwrap_or("-"),
                    expiry = ?line.expiry_date,
                    quantity = line.quantity,
                    "allocating from an expired batch"
                );
            }

            let entries: Vec<NewLedgerEntry> = lines
                .iter()
                .map(|line| {
                    line.to_entry(
                        request.key,
                        request.transaction_type,
                        request.reference.clone(),
                        request.created_by,
                        request.occurred_at,
                    )
                })
                .collect();

            match self
                .ledger
                .append(entries, ExpectedVersion::Exact(position.version()))
            {
                Ok(entries) => {
                    info!(lines = lines.len(), requested, "allocation committed");
                    return Ok(Allocation { lines, entries });
                }
                Err(LedgerStoreError::Concurrency(msg)) => {
                    debug!(attempt, %msg, "allocation raced a concurrent append; re-planning");
                    last_race = msg;
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(retries = self.max_retries, "allocation gave up after repeated races");
        Err(DomainError::conflict(format!(
            "allocation lost {} race(s): {last_race}",
            self.max_retries + 1
        ))
        .into())
    }

    /// Put returned units back into a batch as a positive `SALE` entry.
    #[instrument(skip(self, ret), fields(stream = %ret.key, quantity = ret.quantity), err)]
    pub fn return_sale(&self, ret: SaleReturn) -> ServiceResult<LedgerEntry> {
        if ret.quantity <= 0 {
            return Err(DomainError::validation("return quantity must be positive").into());
        }
        let profile = self.profile(&ret.key)?;
        let quantity = profile.units.to_base(ret.quantity, &ret.unit)?;

        let position = self.position(ret.key)?;
        let unit_cost = position
            .batches()
            .iter()
            .find(|b| b.batch_number == ret.batch_number && b.expiry_date == ret.expiry_date)
            .map(|b| b.unit_cost)
            .unwrap_or_else(|| position.latest_unit_cost());

        self.append_one(
            NewLedgerEntry {
                key: ret.key,
                batch_number: ret.batch_number,
                expiry_date: ret.expiry_date,
                transaction_type: TransactionType::Sale,
                reference: Reference::new(REF_SALE_RETURN, ret.sale_reference),
                quantity_delta: quantity,
                unit_cost,
                created_by: ret.created_by,
                created_at: ret.occurred_at,
            },
            ExpectedVersion::Any,
        )
    }

    /// Offset a committed entry with its negation. Each entry is corrected once.
    ///
    /// The correction is written against the stream version the "already
    /// corrected" check read; a concurrent write surfaces as `Conflict`.
    #[instrument(skip(self), fields(company = %company_id, entry = %entry_id), err)]
    pub fn correct(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
        reason: &str,
        created_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> ServiceResult<LedgerEntry> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("a correction needs a reason").into());
        }
        let original = self
            .ledger
            .find_entry(company_id, entry_id)?
            .ok_or_else(|| DomainError::not_found(format!("ledger entry {entry_id}")))?;

        let id = entry_id.to_string();
        let stream = self.ledger.load_stream(original.key())?;
        if stream.iter().any(|e| e.references(REF_CORRECTION, &id)) {
            return Err(DomainError::conflict(format!("ledger entry {entry_id} is already corrected")).into());
        }

        let read_at = StockPosition::from_entries(&stream).version();
        let committed = self.append_one(
            original.correction(created_by, occurred_at),
            ExpectedVersion::Exact(read_at),
        )?;
        info!(correction = %committed.id, reason = reason.trim(), "ledger entry corrected");
        Ok(committed)
    }

    /// Time-range query for reporting collaborators.
    pub async fn query(
        &self,
        company_id: CompanyId,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> ServiceResult<LedgerPage> {
        Ok(self
            .ledger
            .query_entries(company_id, filter, pagination)
            .await?)
    }
}
