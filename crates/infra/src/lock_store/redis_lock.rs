//! Redis-backed counter leases (feature `redis`).
//!
//! One key per (session, item) holding the JSON lease, written with
//! `SET NX PX` so Redis expires it natively. Replacing or deleting a lease is
//! a compare-and-swap on the exact stored value, so a counter can never drop
//! a lease someone else took over.

use chrono::{DateTime, Duration, Utc};
use redis::Commands;

use rxstock_core::{ItemId, SessionId, UserId};
use rxstock_stocktake::{CounterLock, LockOutcome};

use super::{LockStore, LockStoreError};

const DEFAULT_PREFIX: &str = "rxstock:lock";
const ACQUIRE_ATTEMPTS: usize = 3;

const SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisLockStore {
    client: redis::Client,
    prefix: String,
}

impl RedisLockStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LockStoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, session_id: SessionId, item_id: ItemId) -> String {
        format!("{}:{session_id}:{item_id}", self.prefix)
    }

    fn connection(&self) -> Result<redis::Connection, LockStoreError> {
        self.client.get_connection().map_err(backend)
    }

    fn read(
        conn: &mut redis::Connection,
        key: &str,
    ) -> Result<Option<(String, CounterLock)>, LockStoreError> {
        let raw: Option<String> = conn.get(key).map_err(backend)?;
        raw.map(|raw| {
            let lock = serde_json::from_str(&raw)
                .map_err(|e| LockStoreError::Serialize(e.to_string()))?;
            Ok((raw, lock))
        })
        .transpose()
    }
}

fn backend(err: redis::RedisError) -> LockStoreError {
    LockStoreError::Backend(err.to_string())
}

fn encode(lock: &CounterLock) -> Result<String, LockStoreError> {
    serde_json::to_string(lock).map_err(|e| LockStoreError::Serialize(e.to_string()))
}

fn ttl_millis(lock: &CounterLock, now: DateTime<Utc>) -> i64 {
    (lock.expires_at - now).num_milliseconds().max(1)
}

impl LockStore for RedisLockStore {
    fn acquire(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError> {
        let mut conn = self.connection()?;
        let key = self.key(session_id, item_id);

        for _ in 0..ACQUIRE_ATTEMPTS {
            let fresh = CounterLock::grant(session_id, item_id, counter, now, ttl);
            let payload = encode(&fresh)?;

            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&payload)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(&fresh, now))
                .query(&mut conn)
                .map_err(backend)?;
            if set.is_some() {
                return Ok(LockOutcome::Acquired(fresh));
            }

            // Key vanished between SET and GET: try again.
            let Some((raw, existing)) = Self::read(&mut conn, &key)? else {
                continue;
            };

            let outcome =
                LockOutcome::decide(Some(&existing), session_id, item_id, counter, now, ttl);
            let replacement = match &outcome {
                LockOutcome::Acquired(lock) if *lock != existing => Some(lock.clone()),
                _ => None,
            };
            let Some(lock) = replacement else {
                return Ok(outcome);
            };

            // Expired by the caller's clock but not yet by Redis.
            let swapped: i64 = redis::Script::new(SWAP_SCRIPT)
                .key(&key)
                .arg(&raw)
                .arg(encode(&lock)?)
                .arg(ttl_millis(&lock, now))
                .invoke(&mut conn)
                .map_err(backend)?;
            if swapped == 1 {
                return Ok(outcome);
            }
        }

        Err(LockStoreError::Backend(format!(
            "lease {key} kept changing; gave up after {ACQUIRE_ATTEMPTS} attempts"
        )))
    }

    fn release(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.connection()?;
        let key = self.key(session_id, item_id);

        let Some((raw, lock)) = Self::read(&mut conn, &key)? else {
            return Ok(false);
        };
        if !lock.is_held_by(counter, now) {
            return Ok(false);
        }

        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(&key)
            .arg(&raw)
            .invoke(&mut conn)
            .map_err(backend)?;
        Ok(deleted == 1)
    }

    fn current(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<CounterLock>, LockStoreError> {
        let mut conn = self.connection()?;
        let key = self.key(session_id, item_id);
        Ok(Self::read(&mut conn, &key)?
            .map(|(_, lock)| lock)
            .filter(|lock| lock.is_live(now)))
    }

    fn release_session(&self, session_id: SessionId) -> Result<usize, LockStoreError> {
        let mut conn = self.connection()?;
        let pattern = format!("{}:{session_id}:*", self.prefix);
        let keys: Vec<String> = conn
            .scan_match::<_, String>(&pattern)
            .map_err(backend)?
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        conn.del::<_, usize>(keys).map_err(backend)
    }

    /// Redis expires leases itself.
    fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<usize, LockStoreError> {
        Ok(0)
    }
}
