//! Time-weighted derivative pricing over the history store.
//!
//! Two variants share the history-fetch prologue. TWAP weighs each sample by
//! the time it remained current, guards against spikes with a weighted-median
//! band, and requires 80% window coverage per provider. TVWAP additionally
//! weighs providers against each other by their time-averaged volume.

use crate::decimal::{mul_int64, quo, quo_int64};
use crate::error::{FeederError, FeederResult};
use crate::oracle::vwap::vwap;
use crate::types::{ProviderName, TickerPrice};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Samples further apart than this are treated as a history gap.
pub const MAX_SAMPLE_GAP_SECONDS: i64 = 120;

/// A sample and the whole seconds its price remained current.
struct WeightedSample<'a> {
    ticker: &'a TickerPrice,
    weight: i64,
}

/// Per-provider TWAP merged across providers by VWAP.
///
/// Providers whose series cannot cover the window are skipped; if none
/// survive, the last coverage error is returned so the caller can drop the
/// base and log the missing seconds.
pub fn twap(
    symbol: &str,
    series: &HashMap<ProviderName, Vec<TickerPrice>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> FeederResult<Decimal> {
    let mut synthetic: HashMap<ProviderName, TickerPrice> = HashMap::new();
    let mut last_error = None;

    for (provider, tickers) in series {
        match provider_twap(symbol, tickers, start, end) {
            Ok(ticker) => {
                synthetic.insert(provider.clone(), ticker);
            }
            Err(err) if err.is_insufficient_history() => {
                debug!(symbol = %symbol, provider = %provider, "twap provider skipped: {err}");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    if synthetic.is_empty() {
        return Err(last_error.unwrap_or_else(|| FeederError::NoPrices {
            symbol: symbol.to_string(),
        }));
    }
    vwap(symbol, synthetic.values())
}

/// Time-weighted average price of one provider's series.
fn provider_twap(
    symbol: &str,
    series: &[TickerPrice],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> FeederResult<TickerPrice> {
    let period = end.timestamp() - start.timestamp();
    let minimum_weight = period * 4 / 5;

    let samples = window_samples(series, start, end, false);
    if samples.is_empty() {
        return Err(FeederError::NotEnoughHistory {
            symbol: symbol.to_string(),
            missing_seconds: minimum_weight,
        });
    }

    let median = weighted_median(&samples);
    // spikes beyond half the median in either direction are discarded
    let allowed_deviation = quo_int64(median, 2)?;

    let mut price_sum = Decimal::ZERO;
    let mut weight_total: i64 = 0;
    let mut discarded_time: i64 = 0;

    for sample in &samples {
        if sample.weight > MAX_SAMPLE_GAP_SECONDS {
            discarded_time += sample.weight;
            continue;
        }
        if (sample.ticker.price - median).abs() > allowed_deviation {
            continue;
        }
        price_sum += mul_int64(sample.ticker.price, sample.weight);
        weight_total += sample.weight;
    }

    if weight_total < minimum_weight {
        let missing_seconds = minimum_weight - weight_total;
        if period - discarded_time < minimum_weight {
            return Err(FeederError::TooMuchTimeGap {
                symbol: symbol.to_string(),
                missing_seconds,
            });
        }
        return Err(FeederError::NotEnoughHistory {
            symbol: symbol.to_string(),
            missing_seconds,
        });
    }

    let price = quo_int64(price_sum, weight_total)?;
    // synthetic ticker: the latest raw volume, stamped at the window end
    let volume = samples
        .last()
        .map(|sample| sample.ticker.volume)
        .unwrap_or_default();
    TickerPrice::from_decimals(price, volume, end)
}

/// Time-and-volume weighted average across providers.
///
/// Each provider contributes a time-averaged price weighted by its
/// time-averaged volume; an oversized gap in any series fails the pair.
pub fn tvwap(
    symbol: &str,
    series: &HashMap<ProviderName, Vec<TickerPrice>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> FeederResult<Decimal> {
    let period = end.timestamp() - start.timestamp();
    let minimum_weight = period * 4 / 5;

    let mut price_total = Decimal::ZERO;
    let mut volume_total = Decimal::ZERO;

    for (provider, tickers) in series {
        let samples = window_samples(tickers, start, end, true);
        if samples.is_empty() {
            continue;
        }

        let mut price_sum = Decimal::ZERO;
        let mut volume_sum = Decimal::ZERO;
        let mut time_sum: i64 = 0;

        let mut gap = None;
        for sample in &samples {
            if sample.weight > MAX_SAMPLE_GAP_SECONDS {
                gap = Some(sample.weight);
                break;
            }
            price_sum += mul_int64(sample.ticker.price, sample.weight);
            volume_sum += mul_int64(sample.ticker.volume, sample.weight);
            time_sum += sample.weight;
        }
        if let Some(gap) = gap {
            warn!(symbol = %symbol, provider = %provider, gap, "history gap inside tvwap window");
            return Err(FeederError::MissingHistoryForPair {
                symbol: symbol.to_string(),
            });
        }

        if time_sum < minimum_weight {
            debug!(
                symbol = %symbol,
                provider = %provider,
                covered = time_sum,
                required = minimum_weight,
                "tvwap provider skipped for thin coverage"
            );
            continue;
        }

        let provider_volume = quo_int64(volume_sum, time_sum)?;
        let provider_price = quo_int64(price_sum, time_sum)? * provider_volume;
        price_total += provider_price;
        volume_total += provider_volume;
    }

    if volume_total.is_zero() {
        return Err(FeederError::NoPrices {
            symbol: symbol.to_string(),
        });
    }
    quo(price_total, volume_total)
}

/// Samples inside `[start, end]` with their weights: the gap to the next
/// sample, the last capped at the window end. With `backfill` the first
/// sample also covers the stretch from the window start, as its price is the
/// last known one for that stretch.
fn window_samples<'a>(
    series: &'a [TickerPrice],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    backfill: bool,
) -> Vec<WeightedSample<'a>> {
    let start = start.timestamp();
    let end = end.timestamp();

    let mut in_window: Vec<&TickerPrice> = series
        .iter()
        .filter(|ticker| {
            let at = ticker.time.timestamp();
            at >= start && at <= end
        })
        .collect();
    in_window.sort_by_key(|ticker| ticker.time);

    in_window
        .iter()
        .enumerate()
        .map(|(index, ticker)| {
            let at = ticker.time.timestamp();
            let next = if index + 1 < in_window.len() {
                in_window[index + 1].time.timestamp()
            } else {
                end
            };
            let mut weight = next - at;
            if backfill && index == 0 {
                weight += at - start;
            }
            WeightedSample {
                ticker: *ticker,
                weight,
            }
        })
        .collect()
}

/// Weighted median price: sort by price, take the price at which cumulative
/// weight crosses half the total. With zero total weight the middle sample
/// by price is returned.
fn weighted_median(samples: &[WeightedSample<'_>]) -> Decimal {
    let mut by_price: Vec<&WeightedSample<'_>> = samples.iter().collect();
    by_price.sort_by(|a, b| a.ticker.price.cmp(&b.ticker.price));

    let total: i64 = by_price.iter().map(|sample| sample.weight).sum();
    if total == 0 {
        return by_price[by_price.len() / 2].ticker.price;
    }

    let mut cumulative = 0;
    for sample in &by_price {
        cumulative += sample.weight;
        if 2 * cumulative >= total {
            return sample.ticker.price;
        }
    }
    by_price[by_price.len() - 1].ticker.price
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    fn sample(price: Decimal, volume: Decimal, seconds: i64) -> TickerPrice {
        TickerPrice::from_decimals(price, volume, at(seconds)).unwrap()
    }

    fn single_provider(series: Vec<TickerPrice>) -> HashMap<ProviderName, Vec<TickerPrice>> {
        HashMap::from([(ProviderName::from("osmosis"), series)])
    }

    #[test]
    fn test_twap_constant_price() {
        let series = single_provider(vec![
            sample(dec!(5), dec!(2), 0),
            sample(dec!(5), dec!(2), 1),
            sample(dec!(5), dec!(2), 2),
        ]);
        let price = twap("STATOMATOM", &series, at(0), at(3)).unwrap();
        assert_eq!(price, dec!(5));
    }

    #[test]
    fn test_twap_ramp_discards_spike() {
        let series = single_provider(vec![
            sample(dec!(5), dec!(1), 0),
            sample(dec!(10), dec!(1), 1),
            sample(dec!(15), dec!(1), 2),
            sample(dec!(100), dec!(1), 3),
        ]);
        let price = twap("STATOMATOM", &series, at(0), at(3)).unwrap();
        assert_eq!(price, dec!(10));
    }

    #[test]
    fn test_twap_not_enough_history() {
        let series = single_provider(vec![sample(dec!(5), dec!(1), 0)]);
        // lone sample followed by a 1000s hole in a 1000s window
        let err = twap("X", &series, at(0), at(1000)).unwrap_err();
        assert!(matches!(err, FeederError::TooMuchTimeGap { .. }));
    }

    #[test]
    fn test_twap_empty_series() {
        let series = single_provider(vec![]);
        let err = twap("X", &series, at(0), at(100)).unwrap_err();
        assert!(matches!(
            err,
            FeederError::NotEnoughHistory {
                missing_seconds: 80,
                ..
            }
        ));
    }

    #[test]
    fn test_twap_gap_counts_as_discarded_time() {
        // coverage lost to a >120s gap reports as too much time gap
        let series = single_provider(vec![
            sample(dec!(5), dec!(1), 0),
            sample(dec!(5), dec!(1), 500),
        ]);
        let err = twap("X", &series, at(0), at(600)).unwrap_err();
        assert!(matches!(err, FeederError::TooMuchTimeGap { .. }));
    }

    #[test]
    fn test_tvwap_multi_provider() {
        let mut series = HashMap::new();
        series.insert(
            ProviderName::from("osmosis"),
            vec![
                sample(dec!(8), dec!(1000), 0),
                sample(dec!(12), dec!(1000), 3),
                sample(dec!(11), dec!(1000), 6),
                sample(dec!(9), dec!(1000), 9),
            ],
        );
        series.insert(
            ProviderName::from("binance"),
            vec![
                sample(dec!(100), dec!(10), 3),
                sample(dec!(110), dec!(10), 6),
                sample(dec!(90), dec!(10), 9),
            ],
        );
        let price = tvwap("ATOMUSDT", &series, at(0), at(12)).unwrap();
        assert_eq!(price, dec!(10.891089108910891089));
    }

    #[test]
    fn test_tvwap_single_provider_identity() {
        // uniform spacing: tvwap equals the provider's time-weighted price
        let series = single_provider(vec![
            sample(dec!(10), dec!(5), 0),
            sample(dec!(20), dec!(5), 2),
        ]);
        let price = tvwap("X", &series, at(0), at(4)).unwrap();
        assert_eq!(price, dec!(15));
    }

    #[test]
    fn test_tvwap_gap_fails_pair() {
        let series = single_provider(vec![
            sample(dec!(10), dec!(5), 0),
            sample(dec!(10), dec!(5), 300),
        ]);
        let err = tvwap("X", &series, at(0), at(400)).unwrap_err();
        assert!(matches!(err, FeederError::MissingHistoryForPair { .. }));
    }

    #[test]
    fn test_tvwap_zero_volume_errors() {
        let series = single_provider(vec![
            sample(dec!(10), dec!(0), 0),
            sample(dec!(10), dec!(0), 2),
        ]);
        let err = tvwap("X", &series, at(0), at(4)).unwrap_err();
        assert!(matches!(err, FeederError::NoPrices { .. }));
    }

    #[test]
    fn test_weighted_median_crossing() {
        let series = vec![
            sample(dec!(5), dec!(1), 0),
            sample(dec!(10), dec!(1), 1),
            sample(dec!(15), dec!(1), 2),
            sample(dec!(100), dec!(1), 3),
        ];
        let samples = window_samples(&series, at(0), at(3), false);
        assert_eq!(weighted_median(&samples), dec!(10));
    }
}
