use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use rxstock_core::{ItemId, SessionId, UserId};
use rxstock_stocktake::{CounterLock, LockOutcome};

use super::{LockStore, LockStoreError};

/// Process-local lease table.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<(SessionId, ItemId), CounterLock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leases.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> LockStoreError {
    LockStoreError::Backend("lock poisoned".to_string())
}

impl LockStore for InMemoryLockStore {
    fn acquire(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError> {
        let mut leases = self.leases.lock().map_err(|_| poisoned())?;
        let key = (session_id, item_id);
        let outcome = LockOutcome::decide(leases.get(&key), session_id, item_id, counter, now, ttl);
        if let LockOutcome::Acquired(lock) = &outcome {
            leases.insert(key, lock.clone());
        }
        Ok(outcome)
    }

    fn release(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        let mut leases = self.leases.lock().map_err(|_| poisoned())?;
        let key = (session_id, item_id);
        match leases.get(&key) {
            Some(lock) if lock.is_held_by(counter, now) => {
                leases.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn current(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<CounterLock>, LockStoreError> {
        let leases = self.leases.lock().map_err(|_| poisoned())?;
        Ok(leases
            .get(&(session_id, item_id))
            .filter(|l| l.is_live(now))
            .cloned())
    }

    fn release_session(&self, session_id: SessionId) -> Result<usize, LockStoreError> {
        let mut leases = self.leases.lock().map_err(|_| poisoned())?;
        let before = leases.len();
        leases.retain(|(s, _), _| *s != session_id);
        Ok(before - leases.len())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, LockStoreError> {
        let mut leases = self.leases.lock().map_err(|_| poisoned())?;
        let before = leases.len();
        leases.retain(|_, l| l.is_live(now));
        Ok(before - leases.len())
    }
}
