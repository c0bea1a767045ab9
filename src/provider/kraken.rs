//! Kraken REST provider.
//!
//! Polls the public Ticker endpoint. Kraken names some assets differently
//! (BTC is XBT) and may prefix result keys with X/Z asset-class markers, so
//! requested pairs are matched back against both spellings.

use super::{http_client, Provider};
use crate::error::{FeederError, FeederResult};
use crate::types::{CurrencyPair, ProviderName, TickerPrice, TickerPrices};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

pub const DEFAULT_KRAKEN_URL: &str = "https://api.kraken.com";

pub struct KrakenProvider {
    name: ProviderName,
    base_url: String,
    client: reqwest::Client,
    subscriptions: RwLock<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct KrakenResponse<T> {
    error: Vec<String>,
    #[serde(default)]
    result: Option<T>,
}

/// `c` is [last trade price, lot volume]; `v` is [today, last 24h] volume.
#[derive(Debug, Deserialize)]
struct KrakenTicker {
    c: Vec<String>,
    v: Vec<String>,
}

fn kraken_asset(symbol: &str) -> &str {
    match symbol {
        "BTC" => "XBT",
        "DOGE" => "XDG",
        other => other,
    }
}

fn kraken_pair(pair: &CurrencyPair) -> String {
    format!("{}{}", kraken_asset(&pair.base), kraken_asset(&pair.quote))
}

/// Kraken echoes either the requested name or the X/Z-prefixed class form
/// (XBTUSD comes back as XXBTZUSD).
fn key_matches(key: &str, pair: &CurrencyPair) -> bool {
    let base = kraken_asset(&pair.base);
    let quote = kraken_asset(&pair.quote);
    key == format!("{base}{quote}") || key == format!("X{base}Z{quote}")
}

impl KrakenProvider {
    pub fn new(name: ProviderName, base_url: Option<String>) -> FeederResult<Self> {
        Ok(Self {
            name,
            base_url: base_url.unwrap_or_else(|| DEFAULT_KRAKEN_URL.to_string()),
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

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> FeederResult<T> {
        let response: KrakenResponse<T> = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .error_for_status()
            .map_err(|e| self.unavailable(e))?
            .json()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !response.error.is_empty() {
            return Err(self.unavailable(response.error.join("; ")));
        }
        response
            .result
            .ok_or_else(|| self.unavailable("empty result"))
    }
}

#[async_trait]
impl Provider for KrakenProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn get_ticker_prices(&self, pairs: &[CurrencyPair]) -> FeederResult<TickerPrices> {
        let request: Vec<String> = pairs.iter().map(kraken_pair).collect();
        let result: HashMap<String, KrakenTicker> = self
            .query("/0/public/Ticker", &[("pair", request.join(","))])
            .await?;

        let now = Utc::now();
        let mut prices = TickerPrices::new();
        for (key, ticker) in &result {
            let Some(pair) = pairs.iter().find(|pair| key_matches(key, pair)) else {
                debug!(provider = %self.name, key = %key, "unmatched ticker key");
                continue;
            };
            let (Some(last), Some(volume)) = (ticker.c.first(), ticker.v.get(1)) else {
                continue;
            };
            match TickerPrice::new(last, volume, now) {
                Ok(price) => {
                    prices.insert(pair.symbol(), price);
                }
                Err(err) => {
                    debug!(provider = %self.name, key = %key, "bad ticker: {err}");
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
        #[derive(Debug, Deserialize)]
        struct AssetPair {
            #[serde(default)]
            wsname: Option<String>,
        }
        let result: HashMap<String, AssetPair> =
            self.query("/0/public/AssetPairs", &[]).await?;
        Ok(result
            .into_values()
            .filter_map(|pair| pair.wsname)
            .map(|name| name.replace('/', ""))
            .collect())
    }
}
