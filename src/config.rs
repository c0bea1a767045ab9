//! Configuration management.
//!
//! Declarative TOML wiring: pairs, providers, thresholds, weights, derivative
//! settings, server and timing knobs. Durations use suffixed strings such as
//! "100ms" and "30m".

use crate::decimal::parse_decimal;
use crate::error::{FeederError, FeederResult};
use crate::provider::ProviderKind;
use crate::types::{CurrencyPair, ProviderName};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deviation thresholds above this are rejected at load.
pub const MAX_DEVIATION_THRESHOLD: &str = "3.0";

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    pub currency_pairs: Vec<CurrencyPairConfig>,

    #[serde(default)]
    pub deviation_thresholds: Vec<DeviationThreshold>,
    #[serde(default)]
    pub provider_min_overrides: Vec<ProviderMinOverride>,
    /// base → provider → weight replacing measured volume in the VWAP.
    #[serde(default)]
    pub provider_weight: HashMap<String, HashMap<String, Decimal>>,

    #[serde(default)]
    pub provider_endpoints: Vec<ProviderEndpoint>,
    /// Named URL groups referenced by provider endpoints.
    #[serde(default)]
    pub url_set: HashMap<String, Vec<String>>,
    /// venue → pair symbol → on-chain contract address.
    #[serde(default)]
    pub contract_addresses: HashMap<String, HashMap<String, String>>,

    #[serde(default)]
    pub healthchecks: Vec<Healthcheck>,

    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub provider_timeout: Duration,
    #[serde(default = "default_height_poll_interval", with = "humantime_serde")]
    pub height_poll_interval: Duration,
    #[serde(default = "default_history_db")]
    pub history_db: PathBuf,
    #[serde(default = "default_true")]
    pub enable_server: bool,
    #[serde(default = "default_true")]
    pub enable_voter: bool,
}

/// Embedded status server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_rw_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(default = "default_rw_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            read_timeout: default_rw_timeout(),
            write_timeout: default_rw_timeout(),
        }
    }
}

/// One configured market pair and the providers serving it.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyPairConfig {
    pub base: String,
    pub quote: String,
    pub providers: Vec<String>,
    #[serde(default)]
    pub derivative: Option<DerivativeKind>,
    #[serde(default = "default_derivative_period", with = "humantime_serde")]
    pub derivative_period: Duration,
}

impl CurrencyPairConfig {
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(&self.base, &self.quote)
    }

    pub fn is_derivative(&self) -> bool {
        self.derivative.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeKind {
    Twap,
    Tvwap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviationThreshold {
    pub base: String,
    pub threshold: Decimal,
}

/// Minimum surviving providers for a set of denoms; below it the asset is
/// dropped for the cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMinOverride {
    pub denoms: Vec<String>,
    pub providers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub url_set: Option<String>,
    #[serde(default)]
    pub websocket: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Healthcheck {
    pub url: String,
    #[serde(default = "default_healthcheck_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7171".to_string()
}
fn default_rw_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_provider_timeout() -> Duration {
    Duration::from_millis(100)
}
fn default_height_poll_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_derivative_period() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_healthcheck_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_history_db() -> PathBuf {
    PathBuf::from("prices.db")
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation run at startup; any violation is fatal.
    pub fn validate(&self) -> FeederResult<()> {
        if self.currency_pairs.is_empty() {
            return Err(FeederError::ConfigInvalid(
                "currency_pairs must not be empty".to_string(),
            ));
        }

        for pair in &self.currency_pairs {
            if pair.providers.is_empty() {
                return Err(FeederError::ConfigInvalid(format!(
                    "pair {}{} has no providers",
                    pair.base, pair.quote
                )));
            }
            for provider in &pair.providers {
                if ProviderKind::from_name(provider).is_none() {
                    return Err(FeederError::ConfigInvalid(format!(
                        "unknown provider {provider} for pair {}{}",
                        pair.base, pair.quote
                    )));
                }
            }
        }

        let max_threshold = parse_decimal(MAX_DEVIATION_THRESHOLD)?;
        for threshold in &self.deviation_thresholds {
            if threshold.threshold > max_threshold || threshold.threshold <= Decimal::ZERO {
                return Err(FeederError::ConfigInvalid(format!(
                    "deviation threshold for {} must be in (0, {}]",
                    threshold.base, MAX_DEVIATION_THRESHOLD
                )));
            }
        }

        for over in &self.provider_min_overrides {
            if over.providers < 1 {
                return Err(FeederError::ConfigInvalid(format!(
                    "provider minimum for {:?} must be at least 1",
                    over.denoms
                )));
            }
        }

        for (base, weights) in &self.provider_weight {
            for (provider, weight) in weights {
                if *weight <= Decimal::ZERO {
                    return Err(FeederError::ConfigInvalid(format!(
                        "provider weight {base}/{provider} must be positive"
                    )));
                }
            }
        }

        for endpoint in &self.provider_endpoints {
            if let Some(set) = &endpoint.url_set {
                if !self.url_set.contains_key(set) {
                    return Err(FeederError::ConfigInvalid(format!(
                        "endpoint {} references unknown url_set {set}",
                        endpoint.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn deviation_thresholds_by_base(&self) -> HashMap<String, Decimal> {
        self.deviation_thresholds
            .iter()
            .map(|t| (t.base.to_uppercase(), t.threshold))
            .collect()
    }

    pub fn min_providers_by_base(&self) -> HashMap<String, usize> {
        let mut minimums = HashMap::new();
        for over in &self.provider_min_overrides {
            for denom in &over.denoms {
                minimums.insert(denom.to_uppercase(), over.providers);
            }
        }
        minimums
    }

    pub fn provider_weights(&self) -> HashMap<String, HashMap<ProviderName, Decimal>> {
        self.provider_weight
            .iter()
            .map(|(base, weights)| {
                let weights = weights
                    .iter()
                    .map(|(provider, weight)| (ProviderName::from(provider.as_str()), *weight))
                    .collect();
                (base.to_uppercase(), weights)
            })
            .collect()
    }

    /// Which pairs each provider is asked for on the fan-out.
    pub fn pairs_by_provider(&self) -> HashMap<ProviderName, Vec<CurrencyPair>> {
        let mut by_provider: HashMap<ProviderName, Vec<CurrencyPair>> = HashMap::new();
        for pair in &self.currency_pairs {
            for provider in &pair.providers {
                by_provider
                    .entry(ProviderName::from(provider.as_str()))
                    .or_default()
                    .push(pair.pair());
            }
        }
        by_provider
    }

    pub fn spot_pairs(&self) -> Vec<CurrencyPair> {
        self.currency_pairs
            .iter()
            .filter(|pair| !pair.is_derivative())
            .map(|pair| pair.pair())
            .collect()
    }

    pub fn derivative_pairs(&self) -> Vec<&CurrencyPairConfig> {
        self.currency_pairs
            .iter()
            .filter(|pair| pair.is_derivative())
            .collect()
    }

    pub fn derivative_symbols(&self) -> HashSet<String> {
        self.derivative_pairs()
            .iter()
            .map(|pair| pair.pair().symbol())
            .collect()
    }

    /// Longest configured derivative period; bounds history retention.
    pub fn max_derivative_period(&self) -> Duration {
        self.derivative_pairs()
            .iter()
            .map(|pair| pair.derivative_period)
            .max()
            .unwrap_or_else(default_derivative_period)
    }

    pub fn endpoint(&self, name: &str) -> Option<&ProviderEndpoint> {
        self.provider_endpoints
            .iter()
            .find(|endpoint| endpoint.name == name)
    }

    /// First configured URL for a provider, resolving url_set references.
    pub fn endpoint_url(&self, name: &str) -> Option<String> {
        let endpoint = self.endpoint(name)?;
        if let Some(url) = endpoint.urls.first() {
            return Some(url.clone());
        }
        endpoint
            .url_set
            .as_ref()
            .and_then(|set| self.url_set.get(set))
            .and_then(|urls| urls.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
provider_timeout = "250ms"
history_db = "/tmp/test-prices.db"

[server]
listen_addr = "127.0.0.1:7171"
read_timeout = "10s"

[[currency_pairs]]
base = "ATOM"
quote = "USDT"
providers = ["binance", "kraken"]

[[currency_pairs]]
base = "STATOM"
quote = "ATOM"
providers = ["mock"]
derivative = "twap"
derivative_period = "45m"

[[currency_pairs]]
base = "USDT"
quote = "USD"
providers = ["kraken"]

[[deviation_thresholds]]
base = "ATOM"
threshold = "1.5"

[[provider_min_overrides]]
denoms = ["ATOM"]
providers = 2

[provider_weight.ATOM]
binance = "2.0"

[[provider_endpoints]]
name = "binance"
urls = ["https://api.binance.us"]

[[healthchecks]]
url = "https://hc-ping.com/xxxx"
timeout = "2s"
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.provider_timeout, Duration::from_millis(250));
        assert_eq!(config.height_poll_interval, Duration::from_secs(1));
        assert_eq!(config.server.listen_addr, "127.0.0.1:7171");
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.server.write_timeout, Duration::from_secs(15));
        assert!(config.enable_server);

        assert_eq!(config.currency_pairs.len(), 3);
        let statom = &config.currency_pairs[1];
        assert_eq!(statom.derivative, Some(DerivativeKind::Twap));
        assert_eq!(statom.derivative_period, Duration::from_secs(45 * 60));

        assert_eq!(
            config.deviation_thresholds_by_base()["ATOM"],
            dec!(1.5)
        );
        assert_eq!(config.min_providers_by_base()["ATOM"], 2);
        assert_eq!(
            config.provider_weights()["ATOM"][&ProviderName::from("binance")],
            dec!(2.0)
        );
        assert_eq!(
            config.endpoint_url("binance").unwrap(),
            "https://api.binance.us"
        );
        assert_eq!(config.derivative_symbols().len(), 1);
        assert_eq!(config.max_derivative_period(), Duration::from_secs(45 * 60));
    }

    #[test]
    fn test_empty_pairs_rejected() {
        let config: Config = toml::from_str("currency_pairs = []").unwrap();
        assert!(matches!(
            config.validate(),
            Err(FeederError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let raw = r#"
[[currency_pairs]]
base = "ATOM"
quote = "USD"
providers = ["nyse"]
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_cap() {
        let raw = r#"
[[currency_pairs]]
base = "ATOM"
quote = "USD"
providers = ["kraken"]

[[deviation_thresholds]]
base = "ATOM"
threshold = "3.1"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_override_floor() {
        let raw = r#"
[[currency_pairs]]
base = "ATOM"
quote = "USD"
providers = ["kraken"]

[[provider_min_overrides]]
denoms = ["ATOM"]
providers = 0
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pairs_by_provider() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let by_provider = config.pairs_by_provider();
        assert_eq!(by_provider[&ProviderName::from("kraken")].len(), 2);
        assert_eq!(by_provider[&ProviderName::from("binance")].len(), 1);
        assert_eq!(config.spot_pairs().len(), 2);
        assert_eq!(config.derivative_pairs().len(), 1);
    }
}
