//! Upstream price sources.

use async_trait::async_trait;
use forge_core::Price;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{OracleError, OracleResult};

/// Default timeout for ticker requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Placeholder replaced by the symbol in a ticker URL template.
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// One fetch from the upstream, no caching.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> OracleResult<Price>;
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: Decimal,
}

/// Ticker endpoint returning `{"price": "<decimal>"}`.
///
/// The URL template carries a `{symbol}` placeholder, e.g.
/// `https://api.binance.com/api/v3/ticker/price?symbol={symbol}USDT`.
pub struct HttpPriceSource {
    client: Client,
    url_template: String,
}

impl HttpPriceSource {
    pub fn new(url_template: impl Into<String>) -> OracleResult<Self> {
        let url_template = url_template.into();
        if !url_template.contains(SYMBOL_PLACEHOLDER) {
            return Err(OracleError::HttpClient(format!(
                "ticker url must contain {SYMBOL_PLACEHOLDER}: {url_template}"
            )));
        }

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| OracleError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url_template,
        })
    }

    fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace(SYMBOL_PLACEHOLDER, symbol)
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_price(&self, symbol: &str) -> OracleResult<Price> {
        let url = self.url_for(symbol);
        debug!(%url, symbol, "Fetching price");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;

        Ok(Price::new(ticker.price))
    }
}
