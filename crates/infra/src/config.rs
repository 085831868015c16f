//! Engine configuration.
//!
//! Layers, lowest to highest priority:
//! 1. Defaults in code
//! 2. Optional `config/stockledger.{toml,yaml,json}`
//! 3. Environment variables with the `STOCKLEDGER` prefix and `__` separator,
//!    e.g. `STOCKLEDGER__COSTING__CONSERVATIVE_RATIO=0.5`

use std::time::Duration;

use anyhow::{Context, ensure};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    pub costing: CostingConfig,
    pub ledger: LedgerConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CostingConfig {
    /// Fraction of the sale price used for units with no purchase to draw from.
    pub conservative_ratio: Decimal,

    /// Decimal places of a stored cost basis.
    pub cost_scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    /// Wait for a per-item lock before failing with a concurrent-modification error.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl EngineConfig {
    /// Load from `config/stockledger.*` and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("config/stockledger")
    }

    /// Load with a custom base path for the optional config file.
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config = Self::defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {path}"))?;
        Self::finish(config)
    }

    /// Defaults overlaid with an inline TOML document (no environment).
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .context("failed to parse inline configuration")?;
        Self::finish(config)
    }

    fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
        let builder = config::Config::builder()
            .set_default("costing.conservative_ratio", "0.6")?
            .set_default("costing.cost_scale", 2)?
            .set_default("ledger.lock_timeout_ms", 5000)?
            .set_default("cache.ttl_secs", 300)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", true)?;
        Ok(builder)
    }

    fn finish(config: config::Config) -> anyhow::Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("invalid engine configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let ratio = self.costing.conservative_ratio;
        ensure!(
            !ratio.is_sign_negative() && ratio <= Decimal::ONE,
            "costing.conservative_ratio must be within [0, 1], got {ratio}"
        );
        ensure!(self.costing.cost_scale <= 10, "costing.cost_scale must be at most 10");
        ensure!(self.ledger.lock_timeout_ms > 0, "ledger.lock_timeout_ms must be positive");
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.lock_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Install the tracing subscriber described by `logging`.
    pub fn init_logging(&self) -> bool {
        stockledger_observability::init_with(&self.logging.filter, self.logging.json)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            costing: CostingConfig {
                conservative_ratio: stockledger_costing::DEFAULT_CONSERVATIVE_RATIO,
                cost_scale: stockledger_costing::DEFAULT_COST_SCALE,
            },
            ledger: LedgerConfig {
                lock_timeout_ms: 5000,
            },
            cache: CacheConfig { ttl_secs: 300 },
            logging: LoggingConfig {
                filter: "info".to_string(),
                json: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_in_code_default() {
        let parsed = EngineConfig::from_toml("").unwrap();
        assert_eq!(parsed, EngineConfig::default());
        assert_eq!(parsed.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn toml_overrides_single_keys() {
        let parsed = EngineConfig::from_toml(
            r#"
            [costing]
            conservative_ratio = "0.5"

            [cache]
            ttl_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(parsed.costing.conservative_ratio, dec!(0.5));
        assert_eq!(parsed.costing.cost_scale, 2);
        assert_eq!(parsed.cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        let err = EngineConfig::from_toml("[costing]\nconservative_ratio = \"1.5\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("conservative_ratio"));
    }
}
