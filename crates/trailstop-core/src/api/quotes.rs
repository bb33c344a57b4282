//! Price oracles: where current market prices come from.

use crate::pnl::ensure_positive;
use crate::{Error, Result};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// Source of current market prices.
#[async_trait::async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current price for `symbol`. Always strictly positive on success.
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Ticker-price response body, e.g. `{"symbol":"BTCUSDT","price":"42000.10"}`.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

/// REST ticker-price client.
pub struct HttpPriceOracle {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpPriceOracle {
    /// Default ticker API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.binance.com";

    /// Maximum attempts per quote.
    const MAX_RETRIES: u32 = 3;

    pub fn new(base_url: Option<String>, timeout: StdDuration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(StdDuration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_client,
        })
    }

    fn ticker_url(&self, symbol: &str) -> String {
        format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol)
    }

    /// GET with retry and exponential backoff on 429 and 5xx responses.
    async fn get_with_retry(&self, symbol: &str, url: &str) -> Result<reqwest::Response> {
        let mut last_message = String::from("max retries exceeded");

        for attempt in 0..Self::MAX_RETRIES {
            match self.http_client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    warn!(
                        attempt = attempt + 1,
                        status = %status,
                        symbol = symbol,
                        "Retryable quote error, backing off"
                    );
                    last_message = format!("ticker API returned {}", status);
                }
                Ok(response) => {
                    return Err(Error::QuoteUnavailable {
                        symbol: symbol.to_string(),
                        message: format!("ticker API returned {}", response.status()),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        symbol = symbol,
                        "Quote request failed, backing off"
                    );
                    last_message = e.to_string();
                }
            }

            if attempt + 1 < Self::MAX_RETRIES {
                let backoff = StdDuration::from_millis(250 * 2u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(Error::QuoteUnavailable {
            symbol: symbol.to_string(),
            message: last_message,
        })
    }
}

#[async_trait::async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let url = self.ticker_url(symbol);
        let response = self.get_with_retry(symbol, &url).await?;

        let ticker: TickerPrice = response.json().await.map_err(|e| Error::QuoteUnavailable {
            symbol: symbol.to_string(),
            message: format!("malformed ticker response: {}", e),
        })?;

        debug!(symbol = %ticker.symbol, price = %ticker.price, "Fetched quote");
        ensure_positive(ticker.price)
    }
}

/// Manually maintained quotes, for paper trading and tests.
#[derive(Default)]
pub struct FixedPriceOracle {
    prices: DashMap<String, Decimal>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: impl Into<String>, price: Decimal) {
        self.prices.insert(symbol.into(), price);
    }

    /// Drop a quote so lookups fail with `QuoteUnavailable`.
    pub fn clear_price(&self, symbol: &str) {
        self.prices.remove(symbol);
    }
}

#[async_trait::async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let price = self
            .prices
            .get(symbol)
            .map(|p| *p.value())
            .ok_or_else(|| Error::QuoteUnavailable {
                symbol: symbol.to_string(),
                message: "no quote set".to_string(),
            })?;
        ensure_positive(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_url_trims_trailing_slash() {
        let oracle = HttpPriceOracle::new(
            Some("http://localhost:8080/".to_string()),
            StdDuration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            oracle.ticker_url("ETHUSDT"),
            "http://localhost:8080/api/v3/ticker/price?symbol=ETHUSDT"
        );
    }

    #[test]
    fn test_ticker_price_parses_string_price() {
        let ticker: TickerPrice =
            serde_json::from_str(r#"{"symbol":"BTCUSDT","price":"42000.10000000"}"#).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.price, Decimal::new(4200010, 2));
    }

    #[tokio::test]
    async fn test_fixed_oracle() {
        let oracle = FixedPriceOracle::new().with_price("BTCUSDT", Decimal::new(100, 0));
        assert_eq!(
            oracle.current_price("BTCUSDT").await.unwrap(),
            Decimal::new(100, 0)
        );

        oracle.clear_price("BTCUSDT");
        assert!(matches!(
            oracle.current_price("BTCUSDT").await,
            Err(Error::QuoteUnavailable { .. })
        ));

        oracle.set_price("BTCUSDT", Decimal::ZERO);
        assert!(matches!(
            oracle.current_price("BTCUSDT").await,
            Err(Error::InvalidPrice { .. })
        ));
    }
}
