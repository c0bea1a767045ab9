//! In-memory provider for tests and dry runs.

use super::Provider;
use crate::error::{FeederError, FeederResult};
use crate::types::{CurrencyPair, ProviderName, TickerPrice, TickerPrices};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

/// Serves a fixed set of tickers; never fails, never blocks.
pub struct MockProvider {
    name: ProviderName,
    tickers: RwLock<TickerPrices>,
}

impl MockProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            tickers: RwLock::new(TickerPrices::new()),
        }
    }

    pub fn with_tickers(name: ProviderName, tickers: TickerPrices) -> Self {
        Self {
            name,
            tickers: RwLock::new(tickers),
        }
    }

    pub fn set_ticker(&self, symbol: &str, ticker: TickerPrice) {
        if let Ok(mut tickers) = self.tickers.write() {
            tickers.insert(symbol.to_string(), ticker);
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn get_ticker_prices(&self, pairs: &[CurrencyPair]) -> FeederResult<TickerPrices> {
        let tickers = self.tickers.read().map_err(|_| {
            FeederError::ProviderUnavailable {
                provider: self.name.to_string(),
                reason: "ticker lock poisoned".to_string(),
            }
        })?;
        Ok(pairs
            .iter()
            .filter_map(|pair| {
                let symbol = pair.symbol();
                tickers.get(&symbol).map(|ticker| (symbol, ticker.clone()))
            })
            .collect())
    }

    async fn subscribe_currency_pairs(&self, _pairs: &[CurrencyPair]) -> FeederResult<()> {
        Ok(())
    }

    async fn get_available_pairs(&self) -> FeederResult<HashSet<String>> {
        let tickers = self.tickers.read().map_err(|_| {
            FeederError::ProviderUnavailable {
                provider: self.name.to_string(),
                reason: "ticker lock poisoned".to_string(),
            }
        })?;
        Ok(tickers.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_serves_requested_subset() {
        let mock = MockProvider::new(ProviderName::from("mock"));
        let now = Utc::now();
        mock.set_ticker(
            "ATOMUSDT",
            TickerPrice::from_decimals(dec!(10), dec!(1), now).unwrap(),
        );
        mock.set_ticker(
            "BTCUSDT",
            TickerPrice::from_decimals(dec!(30000), dec!(1), now).unwrap(),
        );

        let pairs = vec![CurrencyPair::new("ATOM", "USDT")];
        let prices = mock.get_ticker_prices(&pairs).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["ATOMUSDT"].price, dec!(10));
    }
}
