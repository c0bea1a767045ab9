//! Statistical deviation filter.
//!
//! Removes per-provider observations whose price lies outside
//! `mean ± threshold * stddev`. Below three observations the statistics are
//! meaningless and the input is returned unchanged.

use crate::decimal::{approx_sqrt, quo_int64};
use crate::error::{FeederError, FeederResult};
use crate::types::{ProviderName, TickerPrice};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Minimum observations for the deviation statistics to mean anything.
pub const MIN_OBSERVATIONS: usize = 3;

/// Default per-base threshold when none is configured.
pub fn default_deviation_threshold() -> Decimal {
    Decimal::ONE
}

/// Arithmetic mean and population standard deviation of a price set.
/// Errors with `InsufficientObservations` below [`MIN_OBSERVATIONS`].
pub fn mean_and_deviation(symbol: &str, prices: &[Decimal]) -> FeederResult<(Decimal, Decimal)> {
    if prices.len() < MIN_OBSERVATIONS {
        return Err(FeederError::InsufficientObservations {
            symbol: symbol.to_string(),
            have: prices.len(),
            need: MIN_OBSERVATIONS,
        });
    }

    let count = prices.len() as i64;
    let sum: Decimal = prices.iter().sum();
    let mean = quo_int64(sum, count)?;

    let squared_error_sum: Decimal = prices
        .iter()
        .map(|price| {
            let diff = *price - mean;
            diff * diff
        })
        .sum();
    let variance = quo_int64(squared_error_sum, count)?;
    let deviation = approx_sqrt(variance)?;

    Ok((mean, deviation))
}

/// Keep every provider whose price lies within `[μ - T*σ, μ + T*σ]`,
/// boundaries inclusive. With fewer than [`MIN_OBSERVATIONS`] entries the
/// input is returned unchanged.
pub fn filter_deviations(
    symbol: &str,
    prices: &HashMap<ProviderName, TickerPrice>,
    threshold: Decimal,
) -> FeederResult<HashMap<ProviderName, TickerPrice>> {
    let values: Vec<Decimal> = prices.values().map(|ticker| ticker.price).collect();
    let (mean, deviation) = match mean_and_deviation(symbol, &values) {
        Ok(stats) => stats,
        Err(FeederError::InsufficientObservations { .. }) => return Ok(prices.clone()),
        Err(err) => return Err(err),
    };

    let band = deviation * threshold;
    let low = mean - band;
    let high = mean + band;

    let filtered: HashMap<ProviderName, TickerPrice> = prices
        .iter()
        .filter(|(_, ticker)| ticker.price >= low && ticker.price <= high)
        .map(|(provider, ticker)| (provider.clone(), ticker.clone()))
        .collect();

    if filtered.len() < prices.len() {
        let dropped: Vec<&ProviderName> = prices
            .keys()
            .filter(|provider| !filtered.contains_key(*provider))
            .collect();
        debug!(
            symbol = %symbol,
            dropped = ?dropped,
            "deviation filter removed {} of {} observations",
            prices.len() - filtered.len(),
            prices.len()
        );
    }

    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tickers(entries: &[(&str, Decimal)]) -> HashMap<ProviderName, TickerPrice> {
        let now = Utc::now();
        entries
            .iter()
            .map(|(provider, price)| {
                (
                    ProviderName::from(*provider),
                    TickerPrice::from_decimals(*price, dec!(1), now).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_insufficient_observations_returned_unchanged() {
        let prices = tickers(&[("kraken", dec!(10)), ("binance", dec!(9000))]);
        let filtered = filter_deviations("BTC", &prices, Decimal::ONE).unwrap();
        assert_eq!(filtered, prices);
    }

    #[test]
    fn test_outlier_dropped() {
        let prices = tickers(&[
            ("kraken", dec!(30000)),
            ("binance", dec!(30010)),
            ("kucoin", dec!(30020)),
            ("coinbase", dec!(30450)),
        ]);
        let filtered = filter_deviations("BTC", &prices, Decimal::ONE).unwrap();
        assert_eq!(filtered.len(), 3);
        assert!(!filtered.contains_key(&ProviderName::from("coinbase")));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        // deviations (-10, -10, 10, 10) give an exact stddev of 10, so every
        // observation sits exactly on the band edge and must survive
        let prices = tickers(&[
            ("a", dec!(10)),
            ("b", dec!(10)),
            ("c", dec!(30)),
            ("d", dec!(30)),
        ]);
        let filtered = filter_deviations("X", &prices, Decimal::ONE).unwrap();
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_mean_and_deviation() {
        let (mean, deviation) =
            mean_and_deviation("X", &[dec!(10), dec!(10), dec!(30), dec!(30)]).unwrap();
        assert_eq!(mean, dec!(20));
        assert_eq!(deviation.round_dp(12), dec!(10));
    }

    #[test]
    fn test_mean_and_deviation_insufficient() {
        let err = mean_and_deviation("X", &[dec!(1), dec!(2)]).unwrap_err();
        assert!(matches!(
            err,
            FeederError::InsufficientObservations { have: 2, need: 3, .. }
        ));
    }
}
