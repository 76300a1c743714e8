//! Infrastructure layer: storage backends, collaborator ports, application
//! services, configuration and background workers.

pub mod bootstrap;
pub mod config;
pub mod ledger_store;
pub mod lock_store;
pub mod order_book;
pub mod ports;
pub mod services;
pub mod stocktake_store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use bootstrap::RxStock;
pub use config::RxStockConfig;
pub use services::{InventoryService, ReorderService, ServiceError, StockTakeService};
