//! Cross-rate resolver.
//!
//! Chains non-USD quotes into USD by iterative conversion: each round first
//! folds in pairs quoted directly in USD, then converts pairs whose quote
//! already has a resolved rate, using a per-round snapshot of conversion
//! rates so that every conversion in a round is based on rates resolved in
//! earlier steps. Pairs whose quote is still unresolved are deferred to the
//! next round, up to a fixed round cap matching the deepest supported chain.

use crate::error::FeederResult;
use crate::oracle::deviation::{default_deviation_threshold, filter_deviations};
use crate::oracle::vwap::vwap;
use crate::types::{AggregatedProviderPrices, CurrencyPair, ProviderName, TickerPrice};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Empirical cap on conversion-chain depth.
const MAX_CONVERSION_ROUNDS: usize = 6;

/// Per-base USD rates accumulated during resolution.
type UsdRates = HashMap<String, HashMap<ProviderName, TickerPrice>>;

/// Resolve every configured base into a USD rate.
///
/// `prices` is the raw per-provider snapshot for this cycle; `pairs` the
/// configured non-derivative pairs. Bases that cannot be resolved, fail the
/// survivor minimum, or aggregate to zero are absent from the result; the
/// caller decides whether that is fatal for the cycle.
pub fn convert_tickers_to_usd(
    prices: &AggregatedProviderPrices,
    pairs: &[CurrencyPair],
    thresholds: &HashMap<String, Decimal>,
    min_providers: &HashMap<String, usize>,
    weights: &HashMap<String, HashMap<ProviderName, Decimal>>,
) -> FeederResult<HashMap<String, Decimal>> {
    let mut usd_rates = UsdRates::new();
    let mut remaining: Vec<&CurrencyPair> = pairs.iter().collect();

    for round in 0..MAX_CONVERSION_ROUNDS {
        // direct USD quotes resolve without conversion
        let (direct, indirect): (Vec<&CurrencyPair>, Vec<&CurrencyPair>) =
            remaining.into_iter().partition(|pair| pair.quote_is_usd());
        for pair in direct {
            let incoming = pair_tickers(prices, pair);
            add_rates(&pair.base, threshold_for(thresholds, &pair.base), &mut usd_rates, incoming)?;
        }

        // conversion rates for this round come from what is resolved so far;
        // rates produced later in the same round are not visible until the
        // next round, so resolution proceeds by chain depth
        let conversion_rates = rate_snapshot(&usd_rates);

        let before = indirect.len();
        let mut deferred = Vec::new();
        for pair in indirect {
            let Some(rate) = conversion_rates.get(&pair.quote) else {
                deferred.push(pair);
                continue;
            };
            let incoming: HashMap<ProviderName, TickerPrice> = pair_tickers(prices, pair)
                .into_iter()
                .map(|(provider, ticker)| {
                    let converted = TickerPrice {
                        price: ticker.price * *rate,
                        volume: ticker.volume,
                        time: ticker.time,
                    };
                    (provider, converted)
                })
                .collect();
            add_rates(&pair.base, threshold_for(thresholds, &pair.base), &mut usd_rates, incoming)?;
        }

        if deferred.is_empty() {
            break;
        }
        if deferred.len() == before {
            // no quote resolved this round; further rounds cannot progress
            warn!(
                round,
                unresolved = ?deferred.iter().map(|p| p.symbol()).collect::<Vec<_>>(),
                "cross-rate resolution stalled"
            );
            break;
        }
        remaining = deferred;
    }

    aggregate(usd_rates, thresholds, min_providers, weights)
}

/// Final per-base pass: deviation filter, survivor minimum, weight override,
/// VWAP. Bases aggregating to zero are dropped.
fn aggregate(
    usd_rates: UsdRates,
    thresholds: &HashMap<String, Decimal>,
    min_providers: &HashMap<String, usize>,
    weights: &HashMap<String, HashMap<ProviderName, Decimal>>,
) -> FeederResult<HashMap<String, Decimal>> {
    let mut rates = HashMap::new();

    for (base, per_provider) in usd_rates {
        if per_provider.is_empty() {
            continue;
        }
        let filtered =
            filter_deviations(&base, &per_provider, threshold_for(thresholds, &base))?;

        if let Some(minimum) = min_providers.get(&base) {
            if filtered.len() < *minimum {
                warn!(
                    base = %base,
                    survivors = filtered.len(),
                    minimum = *minimum,
                    "dropping base below provider minimum"
                );
                continue;
            }
        }

        let weighted = apply_weights(&base, filtered, weights);
        let rate = vwap(&base, weighted.values())?;
        if rate.is_zero() {
            debug!(base, "dropping base with zero aggregate price");
            continue;
        }
        rates.insert(base, rate);
    }

    Ok(rates)
}

/// Merge rule for one symbol. The first resolution of a provider wins, so a
/// provider's price cannot be counted again via a longer conversion chain.
/// The combined set is run through the deviation filter as validation; the
/// observations themselves are kept intact for the final aggregation pass.
fn add_rates(
    symbol: &str,
    threshold: Decimal,
    usd_rates: &mut UsdRates,
    incoming: HashMap<ProviderName, TickerPrice>,
) -> FeederResult<()> {
    let existing = usd_rates.entry(symbol.to_string()).or_default();
    for (provider, ticker) in incoming {
        existing.entry(provider).or_insert(ticker);
    }

    match filter_deviations(symbol, existing, threshold) {
        Ok(filtered) => {
            if filtered.len() < existing.len() {
                debug!(
                    symbol,
                    "{} observations deviate and will not survive aggregation",
                    existing.len() - filtered.len()
                );
            }
            Ok(())
        }
        // below three observations the statistics are meaningless; with more
        // a filter failure poisons every chain through this symbol
        Err(err) if existing.len() < crate::oracle::deviation::MIN_OBSERVATIONS => {
            debug!(symbol, "deviation validation skipped: {err}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// VWAP of each base resolved so far, skipping zero and failed aggregates.
fn rate_snapshot(usd_rates: &UsdRates) -> HashMap<String, Decimal> {
    usd_rates
        .iter()
        .filter_map(|(base, per_provider)| {
            vwap(base, per_provider.values())
                .ok()
                .filter(|rate| !rate.is_zero())
                .map(|rate| (base.clone(), rate))
        })
        .collect()
}

/// Per-provider tickers for one pair symbol.
fn pair_tickers(
    prices: &AggregatedProviderPrices,
    pair: &CurrencyPair,
) -> HashMap<ProviderName, TickerPrice> {
    let symbol = pair.symbol();
    prices
        .iter()
        .filter_map(|(provider, tickers)| {
            tickers
                .get(&symbol)
                .map(|ticker| (provider.clone(), ticker.clone()))
        })
        .collect()
}

fn threshold_for(thresholds: &HashMap<String, Decimal>, base: &str) -> Decimal {
    thresholds
        .get(base)
        .copied()
        .unwrap_or_else(default_deviation_threshold)
}

/// Declared provider weights replace measured volume for the VWAP.
fn apply_weights(
    base: &str,
    tickers: HashMap<ProviderName, TickerPrice>,
    weights: &HashMap<String, HashMap<ProviderName, Decimal>>,
) -> HashMap<ProviderName, TickerPrice> {
    let Some(base_weights) = weights.get(base) else {
        return tickers;
    };
    tickers
        .into_iter()
        .map(|(provider, mut ticker)| {
            if let Some(weight) = base_weights.get(&provider) {
                ticker.volume = *weight;
            }
            (provider, ticker)
        })
        .collect()
}
