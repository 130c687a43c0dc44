//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] forge_core::CoreError),

    #[error("Store error: {0}")]
    Store(#[from] forge_store::StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] forge_oracle::OracleError),

    #[error("Trade worker error: {0}")]
    Trade(#[from] forge_trade::TradeError),

    #[error("Dungeon worker error: {0}")]
    Dungeon(#[from] forge_dungeon::DungeonError),

    #[error("Claim failed: {0}")]
    Settlement(#[from] forge_dungeon::SettlementError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] forge_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
