//! `rxstock-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger and
//! stock-take crates (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, BranchId, CompanyId, CountId, EntryId, ItemId, OrderBookEntryId, SessionId,
    SupplierId, UserId,
};
pub use value_object::ValueObject;
