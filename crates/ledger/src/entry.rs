//! Ledger entries, transaction types and the references they carry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{
    BranchId, CompanyId, DomainError, DomainResult, EntryId, ItemId, UserId, ValueObject,
};

/// Reference type used for reconciliation adjustments.
pub const REF_STOCK_TAKE: &str = "stock_take";
/// Reference type used for compensating entries.
pub const REF_CORRECTION: &str = "correction";
/// Reference type used for customer returns put back into a batch.
pub const REF_SALE_RETURN: &str = "sale_return";

/// Ledger stream key: one balance per (company, branch, item).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub company_id: CompanyId,
    pub branch_id: BranchId,
    pub item_id: ItemId,
}

impl ValueObject for StockKey {}

impl StockKey {
    pub fn new(company_id: CompanyId, branch_id: BranchId, item_id: ItemId) -> Self {
        Self {
            company_id,
            branch_id,
            item_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.company_id, self.branch_id, self.item_id)
    }
}

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Purchase,
    Sale,
    Adjustment,
    Transfer,
    OpeningBalance,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Sale => "SALE",
            TransactionType::Adjustment => "ADJUSTMENT",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::OpeningBalance => "OPENING_BALANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASE" => Some(TransactionType::Purchase),
            "SALE" => Some(TransactionType::Sale),
            "ADJUSTMENT" => Some(TransactionType::Adjustment),
            "TRANSFER" => Some(TransactionType::Transfer),
            "OPENING_BALANCE" => Some(TransactionType::OpeningBalance),
            _ => None,
        }
    }

    /// Whether a delta with this sign is legal for the transaction type.
    ///
    /// Sales and transfers leave the branch, purchases and opening balances
    /// enter it. Adjustments go either way. Sale returns are recorded as
    /// positive `SALE` entries referencing `sale_return`.
    fn accepts(self, delta: i64, reference_type: &str) -> bool {
        match self {
            TransactionType::Purchase | TransactionType::OpeningBalance => delta > 0,
            TransactionType::Sale => delta < 0 || reference_type == REF_SALE_RETURN,
            TransactionType::Transfer => delta < 0,
            TransactionType::Adjustment => true,
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a ledger entry to the document (or entry) that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub reference_id: String,
}

impl ValueObject for Reference {}

impl Reference {
    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }
}

/// An entry ready to be appended (not yet assigned an id or stream position).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub key: StockKey,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub transaction_type: TransactionType,
    pub reference: Reference,
    /// Signed base units, never zero.
    pub quantity_delta: i64,
    /// Cost per base unit in the smallest currency unit.
    pub unit_cost: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Validate the entry in isolation (catalog checks happen at the store boundary).
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity_delta == 0 {
            return Err(DomainError::validation("quantity_delta cannot be zero"));
        }
        if self.unit_cost < 0 {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }
        if self.reference.reference_type.trim().is_empty() {
            return Err(DomainError::validation("reference_type cannot be empty"));
        }
        if self.reference.reference_id.trim().is_empty() {
            return Err(DomainError::validation("reference_id cannot be empty"));
        }
        if let Some(batch) = &self.batch_number {
            if batch.trim().is_empty() {
                return Err(DomainError::validation("batch_number cannot be blank"));
            }
        } else if self.expiry_date.is_some() {
            return Err(DomainError::validation(
                "expiry_date requires a batch_number",
            ));
        }
        if !self
            .transaction_type
            .accepts(self.quantity_delta, &self.reference.reference_type)
        {
            return Err(DomainError::validation(format!(
                "{} entries cannot carry a delta of {}",
                self.transaction_type, self.quantity_delta
            )));
        }
        if self.quantity_delta.checked_mul(self.unit_cost).is_none() {
            return Err(DomainError::validation("total cost overflows"));
        }
        Ok(())
    }
}

/// Immutable, committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub company_id: CompanyId,
    pub branch_id: BranchId,
    pub item_id: ItemId,
    /// 1-based position in the (company, branch, item) stream.
    pub sequence: u64,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub transaction_type: TransactionType,
    pub reference_type: String,
    pub reference_id: String,
    pub quantity_delta: i64,
    pub unit_cost: i64,
    /// `quantity_delta * unit_cost`; signed so sums give stock value.
    pub total_cost: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Commit a validated entry at the given stream position.
    pub fn commit(new: NewLedgerEntry, id: EntryId, sequence: u64) -> DomainResult<Self> {
        new.validate()?;
        let total_cost = new.quantity_delta * new.unit_cost;
        Ok(Self {
            id,
            company_id: new.key.company_id,
            branch_id: new.key.branch_id,
            item_id: new.key.item_id,
            sequence,
            batch_number: new.batch_number,
            expiry_date: new.expiry_date,
            transaction_type: new.transaction_type,
            reference_type: new.reference.reference_type,
            reference_id: new.reference.reference_id,
            quantity_delta: new.quantity_delta,
            unit_cost: new.unit_cost,
            total_cost,
            created_by: new.created_by,
            created_at: new.created_at,
        })
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.company_id, self.branch_id, self.item_id)
    }

    pub fn reference(&self) -> Reference {
        Reference::new(self.reference_type.clone(), self.reference_id.clone())
    }

    pub fn references(&self, reference_type: &str, reference_id: &str) -> bool {
        self.reference_type == reference_type && self.reference_id == reference_id
    }

    /// Compensating entry that cancels this one: same batch, negated delta.
    ///
    /// Corrections are always `ADJUSTMENT`s so either sign is accepted.
    pub fn correction(&self, created_by: UserId, created_at: DateTime<Utc>) -> NewLedgerEntry {
        NewLedgerEntry {
            key: self.key(),
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
            transaction_type: TransactionType::Adjustment,
            reference: Reference::new(REF_CORRECTION, self.id.to_string()),
            quantity_delta: -self.quantity_delta,
            unit_cost: self.unit_cost,
            created_by,
            created_at,
        }
    }
}
