//! Process wiring: configuration in, services out.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use crate::config::RxStockConfig;
use crate::ledger_store::{InMemoryLedgerStore, LedgerBackend, PostgresLedgerStore};
use crate::lock_store::{InMemoryLockStore, LockStore};
use crate::ports::{Catalog, OpenDocuments};
use crate::services::{InventoryService, ReorderService, StockTakeService};
use crate::stocktake_store::PostgresStockTakeStore;
use crate::workers::{LockSweeper, WorkerHandle};

/// The assembled services sharing one ledger and one lease store.
pub struct RxStock {
    pub config: RxStockConfig,
    pub inventory: InventoryService,
    pub stocktake: StockTakeService,
    pub reorder: ReorderService,
    sweeper: Option<WorkerHandle>,
}

impl RxStock {
    /// Wire the services from `config`.
    ///
    /// A configured database URL selects Postgres for the ledger and the
    /// stock-take records. Both must be used from a thread that can block on
    /// the ambient tokio runtime.
    pub fn bootstrap(
        config: RxStockConfig,
        catalog: Arc<dyn Catalog>,
        open_documents: Arc<dyn OpenDocuments>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        rxstock_observability::init_with_level(&config.log_level);

        let pool = config
            .database
            .url
            .as_deref()
            .map(PgPool::connect_lazy)
            .transpose()
            .context("connecting database")?;
        let ledger: Arc<dyn LedgerBackend> = match &pool {
            Some(pool) => {
                info!("ledger and stock-take backend: postgres");
                Arc::new(PostgresLedgerStore::new(pool.clone()))
            }
            None => {
                info!("ledger and stock-take backend: in-memory");
                Arc::new(InMemoryLedgerStore::new())
            }
        };
        let locks = lock_store(&config)?;

        let inventory = InventoryService::new(Arc::clone(&ledger), Arc::clone(&catalog))
            .with_max_retries(config.allocation.max_retries);
        let mut stocktake = StockTakeService::new(Arc::clone(&ledger), Arc::clone(&catalog));
        if let Some(pool) = pool {
            let records = Arc::new(PostgresStockTakeStore::new(pool));
            stocktake = stocktake
                .with_sessions(records.clone())
                .with_counts(records.clone())
                .with_adjustments(records);
        }
        let stocktake = stocktake
            .with_locks(Arc::clone(&locks))
            .with_open_documents(open_documents)
            .with_session_codes(config.session_codes()?)
            .with_lock_ttl(config.lock_ttl());
        let reorder = ReorderService::new(ledger, catalog).with_window_days(config.reorder.window_days);

        let sweeper = match config.sweep_interval() {
            Some(interval) => {
                Some(LockSweeper::spawn(locks, interval).context("spawning lock sweeper")?)
            }
            None => None,
        };

        Ok(Self {
            config,
            inventory,
            stocktake,
            reorder,
            sweeper,
        })
    }

    /// Stop background workers.
    pub fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown();
        }
    }
}

#[cfg(feature = "redis")]
fn lock_store(config: &RxStockConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    use crate::lock_store::RedisLockStore;

    Ok(match config.redis.url.as_deref() {
        Some(url) => {
            info!("lease backend: redis");
            Arc::new(RedisLockStore::new(url).context("opening redis client")?)
        }
        None => Arc::new(InMemoryLockStore::new()),
    })
}

#[cfg(not(feature = "redis"))]
fn lock_store(config: &RxStockConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    if config.redis.url.is_some() {
        tracing::warn!("redis url configured but the `redis` feature is off; using in-memory leases");
    }
    Ok(Arc::new(InMemoryLockStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{InMemoryCatalog, NoOpenDocuments};

    #[test]
    fn default_config_wires_in_memory_backends() {
        let mut config = RxStockConfig::default();
        config.sweeper.interval_secs = 0;
        let app = RxStock::bootstrap(config, Arc::new(InMemoryCatalog::new()), Arc::new(NoOpenDocuments))
            .unwrap();
        assert!(app.sweeper.is_none());
        app.shutdown();
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = RxStockConfig::default();
        config.reorder.window_days = 0;
        let result = RxStock::bootstrap(config, Arc::new(InMemoryCatalog::new()), Arc::new(NoOpenDocuments));
        assert!(result.is_err());
    }
}
