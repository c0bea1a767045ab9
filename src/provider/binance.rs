//! Binance REST provider.
//!
//! Polls the public 24hr ticker endpoint. Binance pair symbols are already
//! the plain concatenation of base and quote, so no translation is needed.

use super::{http_client, Provider};
use crate::error::{FeederError, FeederResult};
use crate::types::{CurrencyPair, ProviderName, TickerPrice, TickerPrices};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::debug;

pub const DEFAULT_BINANCE_URL: &str = "https://api.binance.com";

pub struct BinanceProvider {
    name: ProviderName,
    base_url: String,
    client: reqwest::Client,
    subscriptions: RwLock<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    volume: String,
    #[serde(rename = "closeTime")]
    close_time: i64,
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbol>,
}

#[derive(Debug, Deserialize)]
struct BinanceSymbol {
    symbol: String,
}

impl BinanceProvider {
    pub fn new(name: ProviderName, base_url: Option<String>) -> FeederResult<Self> {
        Ok(Self {
            name,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BINANCE_URL.to_string()),
            client: http_client()?,
            subscriptions: RwLock::new(HashSet::new()),
        })
    }

    fn unavailable(&self, reason: impl ToString) -> FeederError {
        FeederError::ProviderUnavailable {
            provider: self.name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Provider for BinanceProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn get_ticker_prices(&self, pairs: &[CurrencyPair]) -> FeederResult<TickerPrices> {
        let symbols: Vec<String> = pairs.iter().map(|pair| pair.symbol()).collect();
        let symbols_param = serde_json::to_string(&symbols)
            .map_err(|e| self.unavailable(e))?;

        let tickers: Vec<BinanceTicker> = self
            .client
            .get(format!("{}/api/v3/ticker/24hr", self.base_url))
            .query(&[("symbols", symbols_param)])
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .error_for_status()
            .map_err(|e| self.unavailable(e))?
            .json()
            .await
            .map_err(|e| self.unavailable(e))?;

        let mut prices = TickerPrices::new();
        for ticker in tickers {
            if !symbols.contains(&ticker.symbol) {
                continue;
            }
            let time = DateTime::<Utc>::from_timestamp_millis(ticker.close_time)
                .unwrap_or_else(Utc::now);
            match TickerPrice::new(&ticker.last_price, &ticker.volume, time) {
                Ok(price) => {
                    prices.insert(ticker.symbol, price);
                }
                Err(err) => {
                    debug!(provider = %self.name, symbol = %ticker.symbol, "bad ticker: {err}");
                }
            }
        }
        Ok(prices)
    }

    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> FeederResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| self.unavailable("subscription lock poisoned"))?;
        for pair in pairs {
            subscriptions.insert(pair.symbol());
        }
        Ok(())
    }

    async fn get_available_pairs(&self) -> FeederResult<HashSet<String>> {
        let info: BinanceExchangeInfo = self
            .client
            .get(format!("{}/api/v3/exchangeInfo", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .error_for_status()
            .map_err(|e| self.unavailable(e))?
            .json()
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(info.symbols.into_iter().map(|s| s.symbol).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_deserialization() {
        let raw = r#"{
            "symbol": "ATOMUSDT",
            "lastPrice": "10.1230000",
            "volume": "53577.3",
            "closeTime": 1693586700000
        }"#;
        let ticker: BinanceTicker = serde_json::from_str(raw).unwrap();
        assert_eq!(ticker.symbol, "ATOMUSDT");
        assert_eq!(ticker.last_price, "10.1230000");
        assert_eq!(ticker.close_time, 1693586700000);
    }
}
