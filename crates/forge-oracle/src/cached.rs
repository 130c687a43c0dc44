//! Cached oracle with fallback.
//!
//! Lookup order for a symbol:
//! 1. Cache entry younger than the TTL
//! 2. Fresh fetch from the source (cached on success)
//! 3. Last cached value, however old (`stale` fallback)
//! 4. Configured default price (`default` fallback)
//!
//! Only when all four miss does the lookup fail.

use async_trait::async_trait;
use dashmap::DashMap;
use forge_core::Price;
use forge_telemetry::Metrics;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{OracleError, OracleResult};
use crate::source::PriceSource;
use crate::{normalize_symbol, PriceOracle};

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// How long a fetched price is served without refetching.
    pub cache_ttl: Duration,
    /// Last-resort prices per symbol.
    pub default_prices: HashMap<String, Price>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5),
            default_prices: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Price,
    fetched_at: Instant,
}

pub struct CachedOracle<S: PriceSource> {
    source: S,
    cache_ttl: Duration,
    defaults: HashMap<String, Price>,
    cache: DashMap<String, CachedPrice>,
}

impl<S: PriceSource> CachedOracle<S> {
    pub fn new(source: S, config: OracleConfig) -> Self {
        let defaults = config
            .default_prices
            .into_iter()
            .map(|(symbol, price)| (normalize_symbol(&symbol), price))
            .collect();
        Self {
            source,
            cache_ttl: config.cache_ttl,
            defaults,
            cache: DashMap::new(),
        }
    }

    fn fresh(&self, symbol: &str) -> Option<Price> {
        self.cache
            .get(symbol)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.price)
    }

    fn fallback(&self, symbol: &str, cause: &OracleError) -> OracleResult<Price> {
        if let Some(entry) = self.cache.get(symbol) {
            warn!(
                symbol,
                price = %entry.price,
                age_ms = entry.fetched_at.elapsed().as_millis() as u64,
                error = %cause,
                "Price fetch failed, serving stale price"
            );
            Metrics::oracle_fallback(symbol, "stale");
            return Ok(entry.price);
        }
        if let Some(price) = self.defaults.get(symbol) {
            warn!(symbol, %price, error = %cause, "Price fetch failed, serving default price");
            Metrics::oracle_fallback(symbol, "default");
            return Ok(*price);
        }
        Err(OracleError::Unavailable(format!("{symbol}: {cause}")))
    }
}

#[async_trait]
impl<S: PriceSource> PriceOracle for CachedOracle<S> {
    async fn current_price(&self, symbol: &str) -> OracleResult<Price> {
        let symbol = normalize_symbol(symbol);

        if let Some(price) = self.fresh(&symbol) {
            return Ok(price);
        }

        let fetched = self.source.fetch_price(&symbol).await.and_then(|price| {
            if price.is_positive() {
                Ok(price)
            } else {
                Err(OracleError::InvalidPrice {
                    symbol: symbol.clone(),
                    price: price.to_string(),
                })
            }
        });

        match fetched {
            Ok(price) => {
                debug!(symbol = %symbol, %price, "Price refreshed");
                self.cache.insert(
                    symbol,
                    CachedPrice {
                        price,
                        fetched_at: Instant::now(),
                    },
                );
                Ok(price)
            }
            Err(e) => self.fallback(&symbol, &e),
        }
    }
}
