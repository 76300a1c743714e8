//! Application services: the operations collaborators call.
//!
//! Services compose the pure domain crates with the storage traits. Store
//! errors are folded into `ServiceError` so no driver detail crosses this
//! boundary.

pub mod inventory;
pub mod reorder;
pub mod stocktake;

use thiserror::Error;

use rxstock_core::DomainError;

use crate::ledger_store::LedgerStoreError;
use crate::lock_store::LockStoreError;
use crate::order_book::OrderBookStoreError;
use crate::stocktake_store::StockTakeStoreError;

pub use inventory::{Allocation, AllocationRequest, InventoryService, SaleReturn};
pub use reorder::{ReorderOutcome, ReorderService};
pub use stocktake::StockTakeService;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Typed business failure; safe to show to a user.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Backend failure with the driver detail flattened to text.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Storage(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.domain().is_some_and(DomainError::is_retryable)
    }
}

impl From<LedgerStoreError> for ServiceError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::Concurrency(msg) => DomainError::Conflict(msg).into(),
            LedgerStoreError::InvalidAppend(msg) => DomainError::Validation(msg).into(),
            LedgerStoreError::Rejected(e) => e.into(),
            LedgerStoreError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<StockTakeStoreError> for ServiceError {
    fn from(err: StockTakeStoreError) -> Self {
        match err {
            StockTakeStoreError::Concurrency(msg) | StockTakeStoreError::Duplicate(msg) => {
                DomainError::Conflict(msg).into()
            }
            StockTakeStoreError::NotFound(what) => DomainError::NotFound(what).into(),
            StockTakeStoreError::Domain(e) => e.into(),
            StockTakeStoreError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<LockStoreError> for ServiceError {
    fn from(err: LockStoreError) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<OrderBookStoreError> for ServiceError {
    fn from(err: OrderBookStoreError) -> Self {
        match err {
            OrderBookStoreError::NotFound(what) => DomainError::NotFound(what).into(),
            OrderBookStoreError::Domain(e) => e.into(),
            OrderBookStoreError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_races_surface_as_retryable_conflicts() {
        let err: ServiceError = LedgerStoreError::Concurrency("expected Exact(3), found 4".into()).into();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
        assert!(err.is_retryable());

        let err: ServiceError = StockTakeStoreError::Duplicate("adjustment".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn backend_failures_stay_opaque() {
        let err: ServiceError = LockStoreError::Backend("connection refused".into()).into();
        assert!(err.domain().is_none());
        assert!(err.to_string().starts_with("storage failure"));
    }
}
