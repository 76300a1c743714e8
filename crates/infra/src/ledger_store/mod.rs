//! Append-only stock ledger boundary.
//!
//! Streams are keyed by (company, branch, item). There is no update or delete
//! verb anywhere in this module: corrections are new offsetting entries.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
pub use r#trait::{LedgerBackend, LedgerStore, LedgerStoreError};
