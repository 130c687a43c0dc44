//! Application configuration.
//!
//! Loaded from a TOML file layered with `FORGE__SECTION__KEY` environment
//! variables, e.g. `FORGE__STORE__API_KEY` or `FORGE__TRADE__RESOLVER`.
//! Every field has a default, so an empty file is a valid memory-backed
//! dry-run configuration.

use crate::error::{AppError, AppResult};
use config::{Config, Environment, File, FileFormat};
use forge_core::{Price, RiskTable};
use forge_dungeon::{CycleConfig, RecoveryPolicy};
use forge_oracle::OracleConfig;
use forge_realtime::RealtimeConfig;
use forge_store::PostgrestConfig;
use forge_trade::{MonitorConfig, ResolverKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FORGE";
/// Separator between prefix, section and key.
pub const ENV_SEPARATOR: &str = "__";

/// Store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process tables; nothing survives the process.
    #[default]
    Memory,
    /// PostgREST over HTTP with Realtime push.
    Postgrest,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// REST root, e.g. `https://project.supabase.co/rest/v1`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Realtime socket. Empty disables the push path.
    #[serde(default)]
    pub realtime_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            api_key: String::new(),
            realtime_url: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn postgrest(&self) -> PostgrestConfig {
        let mut config = PostgrestConfig::new(&self.url, &self.api_key);
        config.timeout = Duration::from_millis(self.request_timeout_ms);
        config
    }

    /// `None` when no Realtime endpoint is configured.
    pub fn realtime(&self) -> Option<RealtimeConfig> {
        if self.realtime_url.is_empty() {
            return None;
        }
        Some(RealtimeConfig {
            url: self.realtime_url.clone(),
            api_key: self.api_key.clone(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOracleConfig {
    /// Ticker URL template with a `{symbol}` placeholder. Empty means the
    /// engine serves `default_prices` only.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Fallback price per symbol when the ticker is unavailable.
    #[serde(default)]
    pub default_prices: HashMap<String, Decimal>,
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cache_ttl_ms: default_cache_ttl_ms(),
            default_prices: HashMap::new(),
        }
    }
}

impl PriceOracleConfig {
    /// Symbols upper-cased; config keys may arrive lower-cased.
    pub fn default_prices(&self) -> HashMap<String, Price> {
        self.default_prices
            .iter()
            .map(|(symbol, price)| (symbol.to_ascii_uppercase(), Price::new(*price)))
            .collect()
    }

    pub fn cached(&self) -> OracleConfig {
        OracleConfig {
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            default_prices: self.default_prices(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub poll_interval_ms: u64,
    /// Pending trades older than this are promoted to active.
    pub pending_grace_ms: u64,
    pub resolver: ResolverKind,
    /// Used by the `random` resolver only.
    pub liquidation_probability: f64,
    pub risk_tiers: RiskTable,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            pending_grace_ms: 60_000,
            resolver: ResolverKind::Price,
            liquidation_probability: 0.1,
            risk_tiers: RiskTable::default(),
        }
    }
}

impl TradeConfig {
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            pending_grace: Duration::from_millis(self.pending_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonConfig {
    pub cycle_duration_secs: u64,
    pub tick_interval_ms: u64,
    pub reward_per_damage: Decimal,
    pub retry_backoff_ms: u64,
    pub recovery: RecoveryPolicy,
    /// Delete an enrollment's damage events once it is claimed.
    pub purge_events_on_claim: bool,
}

impl Default for DungeonConfig {
    fn default() -> Self {
        let cycle = CycleConfig::default();
        Self {
            cycle_duration_secs: cycle.cycle_duration.as_secs(),
            tick_interval_ms: cycle.tick_interval.as_millis() as u64,
            reward_per_damage: cycle.reward_per_damage,
            retry_backoff_ms: cycle.retry_backoff.as_millis() as u64,
            recovery: cycle.recovery,
            purge_events_on_claim: false,
        }
    }
}

impl DungeonConfig {
    pub fn cycle(&self) -> CycleConfig {
        CycleConfig {
            cycle_duration: Duration::from_secs(self.cycle_duration_secs),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            reward_per_damage: self.reward_per_damage,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            recovery: self.recovery,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Port for `/health` and `/metrics`. 0 disables the endpoint.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_health_port() -> u16 {
    9090
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub oracle: PriceOracleConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub dungeon: DungeonConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load `path` (must exist) with environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let file = path
            .to_str()
            .ok_or_else(|| AppError::Config(format!("Non UTF-8 config path: {}", path.display())))?;
        Self::from_builder(
            Config::builder().add_source(File::new(file, FileFormat::Toml).required(true)),
        )
    }

    /// Parse TOML text with environment overrides, then validate.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        Self::from_builder(
            Config::builder().add_source(File::from_str(content, FileFormat::Toml)),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> AppResult<Self> {
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.store.backend == StoreBackend::Postgrest {
            if self.store.url.is_empty() {
                return Err(AppError::Config(
                    "store.url is required for the postgrest backend".to_string(),
                ));
            }
            if self.store.api_key.is_empty() {
                return Err(AppError::Config(
                    "store.api_key is required for the postgrest backend".to_string(),
                ));
            }
        }
        if !self.oracle.url.is_empty() && !self.oracle.url.contains("{symbol}") {
            return Err(AppError::Config(format!(
                "oracle.url must contain {{symbol}}: {}",
                self.oracle.url
            )));
        }
        if self.oracle.default_prices.values().any(|p| *p <= Decimal::ZERO) {
            return Err(AppError::Config(
                "oracle.default_prices must be positive".to_string(),
            ));
        }
        if self.trade.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "trade.poll_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.trade.liquidation_probability) {
            return Err(AppError::Config(format!(
                "trade.liquidation_probability must be in [0, 1], got {}",
                self.trade.liquidation_probability
            )));
        }
        self.trade.risk_tiers.validate()?;
        self.dungeon
            .cycle()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(())
    }
}
