//! Stock ledger domain module.
//!
//! Business rules for the append-only stock ledger, implemented purely as
//! deterministic domain logic (no IO, no storage): entry validation, batch
//! derivation, unit conversion and first-expiry-first-out allocation planning.

pub mod allocation;
pub mod batch;
pub mod entry;
pub mod unit;

pub use allocation::{AllocationLine, plan_fefo};
pub use batch::{Batch, BatchKey, StockPosition};
pub use entry::{
    LedgerEntry, NewLedgerEntry, REF_CORRECTION, REF_SALE_RETURN, REF_STOCK_TAKE, Reference,
    StockKey, TransactionType,
};
pub use unit::{ItemUnits, UnitOfMeasure};
