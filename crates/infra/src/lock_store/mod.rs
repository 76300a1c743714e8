//! Counter lease storage.
//!
//! Leases are advisory. Expiry is decided against the caller's `now`, so an
//! expired lease is reclaimed by the next acquire whether or not a sweep ran.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_lock;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use rxstock_core::{ItemId, SessionId, UserId};
use rxstock_stocktake::{CounterLock, LockOutcome};

pub use in_memory::InMemoryLockStore;
#[cfg(feature = "redis")]
pub use redis_lock::RedisLockStore;

#[derive(Debug, Error)]
pub enum LockStoreError {
    #[error("lock backend failure: {0}")]
    Backend(String),

    #[error("lock serialization failure: {0}")]
    Serialize(String),
}

/// Per-(session, item) lease table.
pub trait LockStore: Send + Sync {
    /// Try to take the lease. Never waits.
    fn acquire(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError>;

    /// Release if `counter` holds a live lease. Returns whether anything was released.
    fn release(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, LockStoreError>;

    /// The live lease on the item, if any.
    fn current(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<CounterLock>, LockStoreError>;

    fn release_session(&self, session_id: SessionId) -> Result<usize, LockStoreError>;

    /// Drop expired leases. Returns how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, LockStoreError>;
}
