//! Operator-set prices.

use async_trait::async_trait;
use dashmap::DashMap;
use forge_core::Price;

use crate::error::{OracleError, OracleResult};
use crate::{normalize_symbol, PriceOracle};

/// Oracle serving whatever price was last set per symbol.
///
/// Used when no upstream ticker is configured and by tests that need to
/// move the price between polls.
#[derive(Debug, Default)]
pub struct FixedPriceOracle {
    prices: DashMap<String, Price>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(prices: impl IntoIterator<Item = (String, Price)>) -> Self {
        let oracle = Self::new();
        for (symbol, price) in prices {
            oracle.set_price(&symbol, price);
        }
        oracle
    }

    pub fn set_price(&self, symbol: &str, price: Price) {
        self.prices.insert(normalize_symbol(symbol), price);
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn current_price(&self, symbol: &str) -> OracleResult<Price> {
        let symbol = normalize_symbol(symbol);
        self.prices
            .get(&symbol)
            .map(|p| *p)
            .ok_or(OracleError::Unavailable(symbol))
    }
}
