//! Advisory per-item counter leases.
//!
//! Leases only keep two counters from editing the same item at once. They
//! never gate ledger correctness, and expiry is checked lazily.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{DomainError, DomainResult, ItemId, SessionId, UserId};

pub const DEFAULT_LOCK_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterLock {
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub counter_id: UserId,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CounterLock {
    pub fn grant(
        session_id: SessionId,
        item_id: ItemId,
        counter_id: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            session_id,
            item_id,
            counter_id,
            locked_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_held_by(&self, counter: UserId, now: DateTime<Utc>) -> bool {
        self.counter_id == counter && self.is_live(now)
    }

    pub fn held_error(&self) -> DomainError {
        DomainError::LockHeld {
            item_id: self.item_id,
            holder: self.counter_id,
            expires_at: self.expires_at,
        }
    }
}

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired(CounterLock),
    /// Someone else holds a live lease.
    Held(CounterLock),
}

impl LockOutcome {
    /// Decide an acquire against whatever lease is currently stored.
    ///
    /// A live lease of the same counter is returned unchanged (no renewal).
    pub fn decide(
        existing: Option<&CounterLock>,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        match existing {
            Some(lock) if lock.is_held_by(counter, now) => LockOutcome::Acquired(lock.clone()),
            Some(lock) if lock.is_live(now) => LockOutcome::Held(lock.clone()),
            _ => LockOutcome::Acquired(CounterLock::grant(session_id, item_id, counter, now, ttl)),
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    pub fn lock(&self) -> &CounterLock {
        match self {
            LockOutcome::Acquired(lock) | LockOutcome::Held(lock) => lock,
        }
    }

    /// `Held` becomes `DomainError::LockHeld`.
    pub fn into_result(self) -> DomainResult<CounterLock> {
        match self {
            LockOutcome::Acquired(lock) => Ok(lock),
            LockOutcome::Held(lock) => Err(lock.held_error()),
        }
    }
}

/// Check that `counter` may write to an item given the stored lease.
pub fn ensure_not_held_by_other(
    existing: Option<&CounterLock>,
    counter: UserId,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    match existing {
        Some(lock) if lock.is_live(now) && lock.counter_id != counter => Err(lock.held_error()),
        _ => Ok(()),
    }
}
