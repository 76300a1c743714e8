//! Postgres-backed stock ledger.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `LedgerStoreError` | Scenario |
//! |------------|---------------|--------------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Another transaction took the same stream sequence |
//! | Database (check violation) | `23514` | `InvalidAppend` | Row failed a table constraint |
//! | Database (other) | any | `Storage` | Other database errors |
//! | PoolClosed / other | n/a | `Storage` | Connection and network failures |
//!
//! Schema: `migrations/0001_ledger_entries.sql`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use rxstock_core::{BranchId, CompanyId, EntryId, ExpectedVersion, ItemId, UserId};
use rxstock_ledger::{LedgerEntry, NewLedgerEntry, StockKey, TransactionType};

use super::query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
use super::r#trait::{LedgerStore, LedgerStoreError, stream_of};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger_entries.sql");

const SELECT_COLUMNS: &str = r#"
    entry_id, company_id, branch_id, item_id, sequence, batch_number, expiry_date,
    transaction_type, reference_type, reference_id, quantity_delta, unit_cost,
    total_cost, created_by, created_at
"#;

/// Postgres-backed append-only ledger.
///
/// `append()` runs one transaction: read the stream's current sequence, check
/// it against `expected_version`, insert the batch. If another transaction
/// commits in between, the `(company, branch, item, sequence)` unique
/// constraint fails the insert and the caller gets `Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Pool that connects on first use (no runtime needed at construction).
    pub fn connect_lazy(url: &str) -> Result<Self, LedgerStoreError> {
        let pool = PgPool::connect_lazy(url).map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger table and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, entries),
        fields(
            stream = tracing::field::Empty,
            entry_count = entries.len(),
            expected_version = ?expected_version
        ),
        err
    )]
    pub async fn append_entries(
        &self,
        entries: Vec<NewLedgerEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let key = stream_of(&entries)?;
        Span::current().record("stream", tracing::field::display(key));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = current_version(&mut tx, key).await?;
        if !expected_version.matches(current) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut committed = Vec::with_capacity(entries.len());
        for (offset, new) in entries.into_iter().enumerate() {
            let entry = LedgerEntry::commit(new, EntryId::new(), current + offset as u64 + 1)?;

            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    entry_id, company_id, branch_id, item_id, sequence, batch_number,
                    expiry_date, transaction_type, reference_type, reference_id,
                    quantity_delta, unit_cost, total_cost, created_by, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.company_id.as_uuid())
            .bind(entry.branch_id.as_uuid())
            .bind(entry.item_id.as_uuid())
            .bind(entry.sequence as i64)
            .bind(entry.batch_number.as_deref())
            .bind(entry.expiry_date)
            .bind(entry.transaction_type.as_str())
            .bind(&entry.reference_type)
            .bind(&entry.reference_id)
            .bind(entry.quantity_delta)
            .bind(entry.unit_cost)
            .bind(entry.total_cost)
            .bind(entry.created_by.as_uuid())
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LedgerStoreError::Concurrency(format!(
                        "concurrent append detected: sequence {} already exists",
                        entry.sequence
                    ))
                } else {
                    map_sqlx_error("insert_entry", e)
                }
            })?;

            committed.push(entry);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }

    #[instrument(skip(self), fields(stream = %key), err)]
    pub async fn load_entries(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ledger_entries
             WHERE company_id = $1 AND branch_id = $2 AND item_id = $3
             ORDER BY sequence ASC"
        ))
        .bind(key.company_id.as_uuid())
        .bind(key.branch_id.as_uuid())
        .bind(key.item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn find(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ledger_entries WHERE company_id = $1 AND entry_id = $2"
        ))
        .bind(company_id.as_uuid())
        .bind(entry_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_entry", e))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn branch_items(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<BTreeSet<ItemId>, LedgerStoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT item_id FROM ledger_entries WHERE company_id = $1 AND branch_id = $2",
        )
        .bind(company_id.as_uuid())
        .bind(branch_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("items_at_branch", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("item_id")
                    .map(ItemId::from_uuid)
                    .map_err(|e| map_sqlx_error("decode_item_id", e))
            })
            .collect()
    }
}

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
) -> Result<u64, LedgerStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence), 0) AS current_version
        FROM ledger_entries
        WHERE company_id = $1 AND branch_id = $2 AND item_id = $3
        "#,
    )
    .bind(key.company_id.as_uuid())
    .bind(key.branch_id.as_uuid())
    .bind(key.item_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("decode_current_version", e))?;
    Ok(current as u64)
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, LedgerStoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_entry", e);

    let tx_type: String = row.try_get("transaction_type").map_err(decode)?;
    let transaction_type = TransactionType::parse(&tx_type).ok_or_else(|| {
        LedgerStoreError::Storage(format!("unknown transaction_type '{tx_type}' in ledger"))
    })?;
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;

    Ok(LedgerEntry {
        id: EntryId::from_uuid(row.try_get("entry_id").map_err(decode)?),
        company_id: CompanyId::from_uuid(row.try_get("company_id").map_err(decode)?),
        branch_id: BranchId::from_uuid(row.try_get("branch_id").map_err(decode)?),
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode)?),
        sequence: sequence as u64,
        batch_number: row.try_get::<Option<String>, _>("batch_number").map_err(decode)?,
        expiry_date: row.try_get::<Option<NaiveDate>, _>("expiry_date").map_err(decode)?,
        transaction_type,
        reference_type: row.try_get("reference_type").map_err(decode)?,
        reference_id: row.try_get("reference_id").map_err(decode)?,
        quantity_delta: row.try_get("quantity_delta").map_err(decode)?,
        unit_cost: row.try_get("unit_cost").map_err(decode)?,
        total_cost: row.try_get("total_cost").map_err(decode)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(decode)?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerStoreError::Concurrency(msg),
                Some("23514") => LedgerStoreError::InvalidAppend(msg),
                _ => LedgerStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => LedgerStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

fn runtime() -> Result<tokio::runtime::Handle, LedgerStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        LedgerStoreError::Storage(
            "PostgresLedgerStore requires a tokio runtime; call it from within one".to_string(),
        )
    })
}

// The store trait is synchronous; bridge onto the ambient tokio runtime.
impl LedgerStore for PostgresLedgerStore {
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        runtime()?.block_on(self.append_entries(entries, expected_version))
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        runtime()?.block_on(self.load_entries(key))
    }

    fn find_entry(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        runtime()?.block_on(self.find(company_id, entry_id))
    }

    fn items_at_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<BTreeSet<ItemId>, LedgerStoreError> {
        runtime()?.block_on(self.branch_items(company_id, branch_id))
    }
}

#[async_trait::async_trait]
impl LedgerQuery for PostgresLedgerStore {
    async fn query_entries(
        &self,
        company_id: CompanyId,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        const WHERE: &str = r#"
            WHERE company_id = $1
                AND ($2::uuid IS NULL OR branch_id = $2)
                AND ($3::uuid IS NULL OR item_id = $3)
                AND ($4::text IS NULL OR batch_number = $4)
                AND ($5::text IS NULL OR transaction_type = $5)
                AND ($6::timestamptz IS NULL OR created_at >= $6)
                AND ($7::timestamptz IS NULL OR created_at <= $7)
        "#;

        let branch = filter.branch_id.map(|b| *b.as_uuid());
        let item = filter.item_id.map(|i| *i.as_uuid());
        let batch = filter.batch_number.as_deref();
        let tx_type = filter.transaction_type.map(TransactionType::as_str);

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM ledger_entries {WHERE}"))
            .bind(company_id.as_uuid())
            .bind(branch)
            .bind(item)
            .bind(batch)
            .bind(tx_type)
            .bind(filter.occurred_after)
            .bind(filter.occurred_before)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_entries", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| map_sqlx_error("decode_count", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ledger_entries {WHERE}
             ORDER BY created_at ASC, sequence ASC
             LIMIT $8 OFFSET $9"
        ))
        .bind(company_id.as_uuid())
        .bind(branch)
        .bind(item)
        .bind(batch)
        .bind(tx_type)
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_entries", e))?;

        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(LedgerPage::new(entries, total as u64, pagination))
    }
}
