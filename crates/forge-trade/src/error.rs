//! Trade worker error types.

use forge_core::CoreError;
use forge_oracle::OracleError;
use forge_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Trade monitor is already running")]
    AlreadyRunning,

    #[error("Invalid trade configuration: {0}")]
    InvalidConfig(String),
}

pub type TradeResult<T> = Result<T, TradeError>;
