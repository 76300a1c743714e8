//! `rxstock-reorder`
//!
//! **Responsibility:** advisory restocking proposals.
//!
//! Nothing here touches the ledger:
//! - Inputs are snapshots built by callers (infra services) from ledger streams.
//! - Outputs are proposals and order-book rows, never stock movements.

pub mod generator;
pub mod order_book;
pub mod snapshot;

pub use generator::{ReorderJob, ReorderProposal, ReorderRun, quantity_needed};
pub use order_book::{OrderBookEntry, OrderReason, OrderStatus};
pub use snapshot::{BranchStockSnapshot, DEFAULT_WINDOW_DAYS, ItemStock};
