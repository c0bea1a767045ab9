//! Core data model for the price feeder.
//!
//! A `CurrencyPair` is an ordered (base, quote) of uppercase symbols; the
//! feeder ultimately expresses every base in USD. A `TickerPrice` is a
//! (price, volume, time) observation from one provider for one pair.

use crate::decimal::{canonical, parse_decimal};
use crate::error::{FeederError, FeederResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Quote denom all rates resolve into.
pub const USD_DENOM: &str = "USD";

/// Ordered (base, quote) pair of uppercase symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    /// Canonical string: the concatenation of base and quote (e.g. "ATOMUSDT").
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    pub fn quote_is_usd(&self) -> bool {
        self.quote == USD_DENOM
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

/// Opaque interned provider identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderName(String);

impl ProviderName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ProviderName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One provider observation: last price, traded volume, wall-clock UTC time.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerPrice {
    pub price: Decimal,
    pub volume: Decimal,
    pub time: DateTime<Utc>,
}

impl TickerPrice {
    /// Build from wire strings, rejecting unparsable or negative values.
    pub fn new(price: &str, volume: &str, time: DateTime<Utc>) -> FeederResult<Self> {
        Self::from_decimals(parse_decimal(price)?, parse_decimal(volume)?, time)
    }

    pub fn from_decimals(
        price: Decimal,
        volume: Decimal,
        time: DateTime<Utc>,
    ) -> FeederResult<Self> {
        if price.is_sign_negative() {
            return Err(FeederError::NegativeValue {
                field: "price",
                value: price.to_string(),
            });
        }
        if volume.is_sign_negative() {
            return Err(FeederError::NegativeValue {
                field: "volume",
                value: volume.to_string(),
            });
        }
        Ok(Self {
            price,
            volume,
            time,
        })
    }
}

/// symbol → ticker, as returned by one provider for one query.
pub type TickerPrices = HashMap<String, TickerPrice>;

/// provider → (symbol → ticker); one tick's raw snapshot.
pub type AggregatedProviderPrices = HashMap<ProviderName, TickerPrices>;

/// Exchange-rates wire string handed to the vote broadcaster:
/// comma-separated `"<decimal>BASE"` tokens sorted by base ascending,
/// decimals in the canonical 18-fractional-digit form.
pub fn exchange_rates_string(rates: &BTreeMap<String, Decimal>) -> String {
    rates
        .iter()
        .map(|(base, rate)| format!("{}{}", canonical(*rate), base))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_pair_symbol() {
        let pair = CurrencyPair::new("atom", "usdt");
        assert_eq!(pair.base, "ATOM");
        assert_eq!(pair.quote, "USDT");
        assert_eq!(pair.symbol(), "ATOMUSDT");
        assert!(!pair.quote_is_usd());
        assert!(CurrencyPair::new("USDT", "usd").quote_is_usd());
    }

    #[test]
    fn test_ticker_price_rejects_negative() {
        let now = Utc::now();
        assert!(TickerPrice::new("10", "1", now).is_ok());
        assert!(TickerPrice::new("-10", "1", now).is_err());
        assert!(TickerPrice::new("10", "-1", now).is_err());
        assert!(TickerPrice::new("ten", "1", now).is_err());
    }

    #[test]
    fn test_ticker_price_structural_equality() {
        let now = Utc::now();
        let a = TickerPrice::new("10", "1", now).unwrap();
        let b = TickerPrice::from_decimals(dec!(10), dec!(1), now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_exchange_rates_string_sorted_by_base() {
        let mut rates = BTreeMap::new();
        rates.insert("BTC".to_string(), dec!(30017.5));
        rates.insert("ATOM".to_string(), dec!(9.99));
        let out = exchange_rates_string(&rates);
        assert_eq!(
            out,
            "9.990000000000000000ATOM,30017.500000000000000000BTC"
        );
    }

    #[test]
    fn test_exchange_rates_string_empty() {
        assert_eq!(exchange_rates_string(&BTreeMap::new()), "");
    }
}
