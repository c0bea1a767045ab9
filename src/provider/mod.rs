//! Market data providers.
//!
//! Every venue exposes the same small capability set; the aggregation core
//! only touches `get_ticker_prices` on the hot path. Clients are created
//! lazily on first use and cached for the process lifetime.

pub mod binance;
pub mod kraken;
pub mod mock;

pub use binance::BinanceProvider;
pub use kraken::KrakenProvider;
pub use mock::MockProvider;

use crate::config::Config;
use crate::error::{FeederError, FeederResult};
use crate::types::{CurrencyPair, ProviderName, TickerPrices};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Capability set shared by all venues. A call must return within the
/// configured provider timeout; the caller abandons it otherwise.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &ProviderName;

    /// Snapshot of tickers for the given pairs, keyed by the pair symbol.
    /// Missing pairs may be omitted.
    async fn get_ticker_prices(&self, pairs: &[CurrencyPair]) -> FeederResult<TickerPrices>;

    /// Announce the pairs this client will be queried for. REST clients
    /// record them; streaming transports would open subscriptions here.
    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> FeederResult<()>;

    /// Pair symbols the venue supports.
    async fn get_available_pairs(&self) -> FeederResult<HashSet<String>>;
}

/// Supported provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Binance,
    Kraken,
    Mock,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "binance" => Some(Self::Binance),
            "kraken" => Some(Self::Kraken),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

/// Lazily populated client cache, retained for the process lifetime.
#[derive(Default)]
pub struct ProviderCache {
    clients: HashMap<ProviderName, Arc<dyn Provider>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a client, bypassing construction. Used by tests and custom
    /// wiring.
    pub fn insert(&mut self, client: Arc<dyn Provider>) {
        self.clients.insert(client.name().clone(), client);
    }

    /// Fetch the cached client for `name`, constructing it on first use.
    pub fn get_or_create(
        &mut self,
        name: &ProviderName,
        config: &Config,
    ) -> FeederResult<Arc<dyn Provider>> {
        if let Some(client) = self.clients.get(name) {
            return Ok(client.clone());
        }

        let kind = ProviderKind::from_name(name.as_str()).ok_or_else(|| {
            FeederError::ConfigInvalid(format!("unknown provider {name}"))
        })?;
        let url = config.endpoint_url(name.as_str());

        let client: Arc<dyn Provider> = match kind {
            ProviderKind::Binance => Arc::new(BinanceProvider::new(name.clone(), url)?),
            ProviderKind::Kraken => Arc::new(KrakenProvider::new(name.clone(), url)?),
            ProviderKind::Mock => Arc::new(MockProvider::new(name.clone())),
        };
        info!(provider = %name, "created provider client");
        self.clients.insert(name.clone(), client.clone());
        Ok(client)
    }
}

/// Shared reqwest client settings for REST venues.
pub(crate) fn http_client() -> FeederResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("price-feeder/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FeederError::ProviderUnavailable {
            provider: "http".to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_from_name() {
        assert_eq!(ProviderKind::from_name("binance"), Some(ProviderKind::Binance));
        assert_eq!(ProviderKind::from_name("Kraken"), Some(ProviderKind::Kraken));
        assert_eq!(ProviderKind::from_name("nyse"), None);
    }

    #[test]
    fn test_cache_reuses_clients() {
        let mut cache = ProviderCache::new();
        let mock = Arc::new(MockProvider::new(ProviderName::from("mock")));
        cache.insert(mock.clone());

        let raw = r#"
[[currency_pairs]]
base = "ATOM"
quote = "USD"
providers = ["mock"]
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let fetched = cache
            .get_or_create(&ProviderName::from("mock"), &config)
            .unwrap();
        let seeded: Arc<dyn Provider> = mock;
        assert!(Arc::ptr_eq(&fetched, &seeded));
    }
}
