//! Price oracle for trade resolution.
//!
//! - [`PriceOracle`]: best-effort current price per symbol
//! - [`HttpPriceSource`]: upstream ticker over HTTP
//! - [`CachedOracle`]: short TTL cache with stale and default fallback
//! - [`FixedPriceOracle`]: operator-set prices for dry runs and tests

pub mod cached;
pub mod error;
pub mod fixed;
pub mod source;

pub use cached::{CachedOracle, OracleConfig};
pub use error::{OracleError, OracleResult};
pub use fixed::FixedPriceOracle;
pub use source::{HttpPriceSource, PriceSource};

use async_trait::async_trait;
use forge_core::Price;

/// Supplies the current price of an asset symbol.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Best-effort price. May be stale; errors only when nothing usable is known.
    async fn current_price(&self, symbol: &str) -> OracleResult<Price>;
}

/// Symbols are matched case-insensitively.
pub(crate) fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
