//! Postgres-backed stock-take records.
//!
//! Each row carries the full record as JSONB next to the key columns the
//! uniqueness rules and lookups need.
//!
//! ## Error mapping
//!
//! | Constraint | `StockTakeStoreError` |
//! |------------|-----------------------|
//! | `stocktake_sessions_open_branch` | `Domain(SessionConflict)` |
//! | `stocktake_sessions_code`, `stocktake_counts_slot`, `stocktake_adjustments_item` | `Duplicate` |
//! | other unique violations (primary keys, event sequence) | `Concurrency` |
//! | anything else | `Storage` |
//!
//! Schema: `migrations/0002_stocktake.sql`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use rxstock_core::{
    AggregateRoot, BranchId, CompanyId, CountId, DomainError, ExpectedVersion, ItemId, SessionId,
    UserId,
};
use rxstock_events::EventEnvelope;
use rxstock_stocktake::{Adjustment, Count, SessionEvent, StockTakeSession};

use super::r#trait::{
    AdjustmentStore, CountStore, SESSION_STREAM_TYPE, SessionStore, StockTakeStoreError,
    check_version,
};

const SCHEMA: &str = include_str!("../../migrations/0002_stocktake.sql");

/// Sessions, session history, counts and adjustments in one Postgres pool.
///
/// Writes run in a transaction that locks the row being replaced
/// (`SELECT ... FOR UPDATE`) before the version check.
#[derive(Debug, Clone)]
pub struct PostgresStockTakeStore {
    pool: Arc<PgPool>,
}

impl PostgresStockTakeStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn connect_lazy(url: &str) -> Result<Self, StockTakeStoreError> {
        let pool = PgPool::connect_lazy(url).map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the stock-take tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StockTakeStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StockTakeStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    // ---- sessions -------------------------------------------------------

    #[instrument(
        skip(self, session, events),
        fields(session = %session.id_typed(), events = events.len(), expected = ?expected),
        err
    )]
    pub async fn save_session(
        &self,
        session: &StockTakeSession,
        events: &[SessionEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StockTakeStoreError> {
        let (company_id, branch_id) = session.scope()?;
        let session_id = session.id_typed();
        let mut tx = self.begin().await?;

        let stored = sqlx::query("SELECT version FROM stocktake_sessions WHERE session_id = $1 FOR UPDATE")
            .bind(session_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_session", e))?
            .map(|row| row.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_session_version", e))?
            .unwrap_or(0) as u64;
        check_version(&format!("session {session_id}"), expected, stored)?;

        if session.version() != stored + events.len() as u64 {
            return Err(DomainError::invariant(format!(
                "session {session_id} at version {} does not follow {stored} by {} event(s)",
                session.version(),
                events.len()
            ))
            .into());
        }

        if session.is_open() {
            let clash = sqlx::query(
                r#"
                SELECT session_code FROM stocktake_sessions
                WHERE company_id = $1 AND branch_id = $2 AND is_open AND session_id <> $3
                LIMIT 1
                "#,
            )
            .bind(company_id.as_uuid())
            .bind(branch_id.as_uuid())
            .bind(session_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("open_session_check", e))?;
            if let Some(row) = clash {
                let existing: String = row
                    .try_get("session_code")
                    .map_err(|e| map_sqlx_error("decode_session_code", e))?;
                return Err(DomainError::SessionConflict { branch_id, existing }.into());
            }
        }

        let statement = if stored == 0 {
            r#"
            INSERT INTO stocktake_sessions
                (session_id, company_id, branch_id, session_code, status, is_open, version, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        } else {
            r#"
            UPDATE stocktake_sessions
            SET company_id = $2, branch_id = $3, session_code = $4, status = $5,
                is_open = $6, version = $7, payload = $8
            WHERE session_id = $1
            "#
        };
        sqlx::query(statement)
            .bind(session_id.as_uuid())
            .bind(company_id.as_uuid())
            .bind(branch_id.as_uuid())
            .bind(session.session_code())
            .bind(session.status().as_str())
            .bind(session.is_open())
            .bind(session.version() as i64)
            .bind(Json(session))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_session_write_error(e, branch_id))?;

        for (offset, event) in events.iter().enumerate() {
            let envelope = EventEnvelope::record(
                company_id,
                *session_id.as_uuid(),
                SESSION_STREAM_TYPE,
                stored + offset as u64 + 1,
                event.clone(),
            );
            sqlx::query(
                r#"
                INSERT INTO stocktake_session_events (session_id, sequence, company_id, event_type, envelope)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(session_id.as_uuid())
            .bind(envelope.sequence_number() as i64)
            .bind(company_id.as_uuid())
            .bind(envelope.event_type())
            .bind(Json(&envelope))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_session_event", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    pub async fn load_session(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        let row = sqlx::query("SELECT payload FROM stocktake_sessions WHERE company_id = $1 AND session_id = $2")
            .bind(company_id.as_uuid())
            .bind(session_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_session", e))?;
        row.as_ref().map(|r| payload(r, "payload")).transpose()
    }

    pub async fn open_session(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        let row = sqlx::query(
            "SELECT payload FROM stocktake_sessions WHERE company_id = $1 AND branch_id = $2 AND is_open",
        )
        .bind(company_id.as_uuid())
        .bind(branch_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_for_branch", e))?;
        row.as_ref().map(|r| payload(r, "payload")).transpose()
    }

    pub async fn has_code(&self, company_id: CompanyId, code: &str) -> Result<bool, StockTakeStoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM stocktake_sessions WHERE company_id = $1 AND session_code = $2) AS taken",
        )
        .bind(company_id.as_uuid())
        .bind(code)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("code_exists", e))?;
        row.try_get("taken").map_err(|e| map_sqlx_error("decode_code_exists", e))
    }

    pub async fn load_history(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Vec<EventEnvelope<SessionEvent>>, StockTakeStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT envelope FROM stocktake_session_events
            WHERE company_id = $1 AND session_id = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(company_id.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_history", e))?;
        rows.iter().map(|r| payload(r, "envelope")).collect()
    }

    // ---- counts ---------------------------------------------------------

    async fn count_version(
        tx: &mut Transaction<'_, Postgres>,
        count_id: CountId,
    ) -> Result<Option<u64>, StockTakeStoreError> {
        let row = sqlx::query("SELECT version FROM stocktake_counts WHERE count_id = $1 FOR UPDATE")
            .bind(count_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_count", e))?;
        row.map(|r| r.try_get::<i64, _>("version").map(|v| v as u64))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_count_version", e))
    }

    async fn write_count(tx: &mut Transaction<'_, Postgres>, count: &Count) -> Result<(), StockTakeStoreError> {
        sqlx::query(
            r#"
            INSERT INTO stocktake_counts (
                count_id, session_id, item_id, counted_by, shelf_location,
                verification_status, counted_at, version, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (count_id) DO UPDATE
            SET shelf_location = EXCLUDED.shelf_location,
                verification_status = EXCLUDED.verification_status,
                counted_at = EXCLUDED.counted_at,
                version = EXCLUDED.version,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(count.id.as_uuid())
        .bind(count.session_id.as_uuid())
        .bind(count.item_id.as_uuid())
        .bind(count.counted_by.as_uuid())
        .bind(&count.shelf_location)
        .bind(count.verification_status.as_str())
        .bind(count.counted_at)
        .bind(count.version as i64)
        .bind(Json(count))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_count", e))?;
        Ok(())
    }

    #[instrument(skip(self, count), fields(count = %count.id, expected = ?expected), err)]
    pub async fn upsert_count(&self, count: Count, expected: ExpectedVersion) -> Result<(), StockTakeStoreError> {
        let mut tx = self.begin().await?;
        let stored = Self::count_version(&mut tx, count.id).await?.unwrap_or(0);
        check_version(&format!("count {}", count.id), expected, stored)?;
        Self::write_count(&mut tx, &count).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, updates), fields(counts = updates.len()), err)]
    pub async fn update_counts(&self, updates: Vec<(Count, u64)>) -> Result<(), StockTakeStoreError> {
        let mut tx = self.begin().await?;
        for (count, read_at) in &updates {
            let stored = Self::count_version(&mut tx, count.id)
                .await?
                .ok_or_else(|| StockTakeStoreError::NotFound(format!("count {}", count.id)))?;
            check_version(&format!("count {}", count.id), ExpectedVersion::Exact(*read_at), stored)?;
        }
        for (count, _) in &updates {
            Self::write_count(&mut tx, count).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    pub async fn load_count(&self, count_id: CountId) -> Result<Option<Count>, StockTakeStoreError> {
        let row = sqlx::query("SELECT payload FROM stocktake_counts WHERE count_id = $1")
            .bind(count_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_count", e))?;
        row.as_ref().map(|r| payload(r, "payload")).transpose()
    }

    pub async fn find_count(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
    ) -> Result<Option<Count>, StockTakeStoreError> {
        let row = sqlx::query(
            "SELECT payload FROM stocktake_counts WHERE session_id = $1 AND item_id = $2 AND counted_by = $3",
        )
        .bind(session_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(counter.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_count", e))?;
        row.as_ref().map(|r| payload(r, "payload")).transpose()
    }

    pub async fn session_counts(&self, session_id: SessionId) -> Result<Vec<Count>, StockTakeStoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM stocktake_counts WHERE session_id = $1 ORDER BY counted_at ASC, count_id ASC",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_counts", e))?;
        rows.iter().map(|r| payload(r, "payload")).collect()
    }

    // ---- adjustments ----------------------------------------------------

    pub async fn insert_adjustment(&self, adjustment: Adjustment) -> Result<(), StockTakeStoreError> {
        sqlx::query(
            r#"
            INSERT INTO stocktake_adjustments (
                adjustment_id, session_id, item_id, adjustment_quantity, ledger_entry_id, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(adjustment.id.as_uuid())
        .bind(adjustment.session_id.as_uuid())
        .bind(adjustment.item_id.as_uuid())
        .bind(adjustment.adjustment_quantity)
        .bind(adjustment.ledger_entry_id.map(|id| *id.as_uuid()))
        .bind(Json(&adjustment))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_adjustment", e))?;
        Ok(())
    }

    pub async fn load_adjustment(
        &self,
        session_id: SessionId,
        item_id: ItemId,
    ) -> Result<Option<Adjustment>, StockTakeStoreError> {
        let row = sqlx::query("SELECT payload FROM stocktake_adjustments WHERE session_id = $1 AND item_id = $2")
            .bind(session_id.as_uuid())
            .bind(item_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_adjustment", e))?;
        row.as_ref().map(|r| payload(r, "payload")).transpose()
    }

    pub async fn session_adjustments(&self, session_id: SessionId) -> Result<Vec<Adjustment>, StockTakeStoreError> {
        let rows = sqlx::query("SELECT payload FROM stocktake_adjustments WHERE session_id = $1 ORDER BY item_id ASC")
            .bind(session_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_adjustments", e))?;
        rows.iter().map(|r| payload(r, "payload")).collect()
    }

    async fn delete_session_rows(&self, table: &str, session_id: SessionId) -> Result<usize, StockTakeStoreError> {
        let done = sqlx::query(&format!("DELETE FROM {table} WHERE session_id = $1"))
            .bind(session_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("discard_session", e))?;
        Ok(done.rows_affected() as usize)
    }
}

fn payload<T: DeserializeOwned>(row: &sqlx::postgres::PgRow, column: &str) -> Result<T, StockTakeStoreError> {
    row.try_get::<Json<T>, _>(column)
        .map(|Json(value)| value)
        .map_err(|e| map_sqlx_error("decode_payload", e))
}

fn map_session_write_error(err: sqlx::Error, branch_id: BranchId) -> StockTakeStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some("stocktake_sessions_open_branch") {
            return DomainError::SessionConflict {
                branch_id,
                existing: "(created concurrently)".to_string(),
            }
            .into();
        }
    }
    map_sqlx_error("write_session", err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockTakeStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match (db_err.code().as_deref(), db_err.constraint()) {
                (
                    Some("23505"),
                    Some("stocktake_sessions_code" | "stocktake_counts_slot" | "stocktake_adjustments_item"),
                ) => StockTakeStoreError::Duplicate(msg),
                (Some("23505"), _) => StockTakeStoreError::Concurrency(msg),
                _ => StockTakeStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StockTakeStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StockTakeStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn runtime() -> Result<tokio::runtime::Handle, StockTakeStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StockTakeStoreError::Storage(
            "PostgresStockTakeStore requires a tokio runtime; call it from within one".to_string(),
        )
    })
}

// The store traits are synchronous; bridge onto the ambient tokio runtime.
impl SessionStore for PostgresStockTakeStore {
    fn save(
        &self,
        session: &StockTakeSession,
        events: &[SessionEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StockTakeStoreError> {
        runtime()?.block_on(self.save_session(session, events, expected))
    }

    fn get(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        runtime()?.block_on(self.load_session(company_id, session_id))
    }

    fn open_for_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        runtime()?.block_on(self.open_session(company_id, branch_id))
    }

    fn code_exists(&self, company_id: CompanyId, code: &str) -> Result<bool, StockTakeStoreError> {
        runtime()?.block_on(self.has_code(company_id, code))
    }

    fn history(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Vec<EventEnvelope<SessionEvent>>, StockTakeStoreError> {
        runtime()?.block_on(self.load_history(company_id, session_id))
    }
}

impl CountStore for PostgresStockTakeStore {
    fn upsert(&self, count: Count, expected: ExpectedVersion) -> Result<(), StockTakeStoreError> {
        runtime()?.block_on(self.upsert_count(count, expected))
    }

    fn get(&self, count_id: CountId) -> Result<Option<Count>, StockTakeStoreError> {
        runtime()?.block_on(self.load_count(count_id))
    }

    fn find(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
    ) -> Result<Option<Count>, StockTakeStoreError> {
        runtime()?.block_on(self.find_count(session_id, item_id, counter))
    }

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Count>, StockTakeStoreError> {
        runtime()?.block_on(self.session_counts(session_id))
    }

    fn update_many(&self, counts: Vec<(Count, u64)>) -> Result<(), StockTakeStoreError> {
        runtime()?.block_on(self.update_counts(counts))
    }

    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError> {
        runtime()?.block_on(self.delete_session_rows("stocktake_counts", session_id))
    }
}

impl AdjustmentStore for PostgresStockTakeStore {
    fn insert(&self, adjustment: Adjustment) -> Result<(), StockTakeStoreError> {
        runtime()?.block_on(self.insert_adjustment(adjustment))
    }

    fn get(
        &self,
        session_id: SessionId,
        item_id: ItemId,
    ) -> Result<Option<Adjustment>, StockTakeStoreError> {
        runtime()?.block_on(self.load_adjustment(session_id, item_id))
    }

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Adjustment>, StockTakeStoreError> {
        runtime()?.block_on(self.session_adjustments(session_id))
    }

    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError> {
        runtime()?.block_on(self.delete_session_rows("stocktake_adjustments", session_id))
    }
}
