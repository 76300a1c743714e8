//! Runtime configuration.
//!
//! Sources, later ones winning:
//! 1. Defaults in code
//! 2. `rxstock.toml` (optional)
//! 3. Environment variables with the `RXSTOCK__` prefix, `__` between levels
//!    (e.g. `RXSTOCK__STOCKTAKE__LOCK_TTL_SECS=120`)

use std::path::Path;

use anyhow::{Context, ensure};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use rxstock_reorder::DEFAULT_WINDOW_DAYS;
use rxstock_stocktake::code::{DEFAULT_CODE_ATTEMPTS, DEFAULT_MAX_CODE_LEN};
use rxstock_stocktake::{DEFAULT_LOCK_TTL_SECS, MIN_CODE_WIDTH, SessionCodeGenerator};

pub const DEFAULT_CONFIG_FILE: &str = "rxstock";
pub const ENV_PREFIX: &str = "RXSTOCK";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RxStockConfig {
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub stocktake: StockTakeSettings,
    pub allocation: AllocationSettings,
    pub reorder: ReorderSettings,
    pub sweeper: SweeperSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockTakeSettings {
    pub lock_ttl_secs: i64,
    /// Readable session codes tried per day before the timestamp fallback.
    pub code_attempts: u32,
    /// Stored width of the session code column.
    pub max_code_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllocationSettings {
    /// Re-plans after losing a race with a concurrent append.
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReorderSettings {
    pub window_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SweeperSettings {
    /// 0 disables the lock sweeper.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres URL for the ledger and stock-take records. In-memory when unset.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RedisSettings {
    /// Redis URL for counter leases. In-memory when unset.
    pub url: Option<String>,
}

impl Default for RxStockConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stocktake: StockTakeSettings {
                lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
                code_attempts: DEFAULT_CODE_ATTEMPTS,
                max_code_len: DEFAULT_MAX_CODE_LEN,
            },
            allocation: AllocationSettings { max_retries: 3 },
            reorder: ReorderSettings {
                window_days: DEFAULT_WINDOW_DAYS,
            },
            sweeper: SweeperSettings { interval_secs: 60 },
            database: DatabaseSettings::default(),
            redis: RedisSettings::default(),
        }
    }
}

impl RxStockConfig {
    /// Load from `rxstock.toml` in the working directory and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from an optional config file (extension may be omitted) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        let config = Self::defaults()?
            .add_source(File::with_name(&name).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("reading configuration from {}", path.display()))?;

        let loaded: Self = config
            .try_deserialize()
            .context("deserializing configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Defaults overlaid with an inline TOML document (no environment).
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let loaded: Self = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
        let d = Self::default();
        Ok(config::Config::builder()
            .set_default("log_level", d.log_level)?
            .set_default("stocktake.lock_ttl_secs", d.stocktake.lock_ttl_secs)?
            .set_default("stocktake.code_attempts", i64::from(d.stocktake.code_attempts))?
            .set_default("stocktake.max_code_len", d.stocktake.max_code_len as i64)?
            .set_default("allocation.max_retries", i64::from(d.allocation.max_retries))?
            .set_default("reorder.window_days", d.reorder.window_days)?
            .set_default("sweeper.interval_secs", d.sweeper.interval_secs as i64)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.stocktake.lock_ttl_secs > 0,
            "stocktake.lock_ttl_secs must be positive"
        );
        ensure!(
            (1..=26).contains(&self.stocktake.code_attempts),
            "stocktake.code_attempts must be between 1 and 26"
        );
        ensure!(
            self.stocktake.max_code_len >= MIN_CODE_WIDTH,
            "stocktake.max_code_len must be at least {MIN_CODE_WIDTH}"
        );
        ensure!(self.reorder.window_days > 0, "reorder.window_days must be positive");
        Ok(())
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stocktake.lock_ttl_secs)
    }

    pub fn session_codes(&self) -> anyhow::Result<SessionCodeGenerator> {
        SessionCodeGenerator::new(self.stocktake.code_attempts, self.stocktake.max_code_len)
            .context("building session code generator")
    }

    pub fn sweep_interval(&self) -> Option<std::time::Duration> {
        (self.sweeper.interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.sweeper.interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = RxStockConfig::from_toml("").unwrap();
        assert_eq!(config, RxStockConfig::default());
        assert_eq!(config.lock_ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.allocation.max_retries, 3);
        assert_eq!(config.sweep_interval(), Some(std::time::Duration::from_secs(60)));
        assert!(config.database.url.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = RxStockConfig::from_toml(
            r#"
            log_level = "debug"

            [stocktake]
            lock_ttl_secs = 120

            [sweeper]
            interval_secs = 0

            [database]
            url = "postgres://localhost/rxstock"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.stocktake.lock_ttl_secs, 120);
        assert_eq!(config.stocktake.code_attempts, 26);
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/rxstock"));
    }

    #[test]
    fn narrow_code_columns_are_refused() {
        let err = RxStockConfig::from_toml("[stocktake]\nmax_code_len = 9").unwrap_err();
        assert!(err.to_string().contains("max_code_len"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RxStockConfig::load_from("does/not/exist/rxstock").unwrap();
        assert_eq!(config.stocktake.max_code_len, 32);
    }
}
