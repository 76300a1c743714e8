//! Persistence for stock-take sessions, counts and adjustments.
//!
//! Every write is a single atomic step with an optimistic version check.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryAdjustmentStore, InMemoryCountStore, InMemorySessionStore};
pub use postgres::PostgresStockTakeStore;
pub use r#trait::{AdjustmentStore, CountStore, SessionStore, StockTakeStoreError};
