//! Volume-weighted average price.

use crate::decimal::{quo, quo_int64};
use crate::error::{FeederError, FeederResult};
use crate::types::TickerPrice;
use rust_decimal::Decimal;

/// `Σ p*v / Σ v` over the given tickers. When every volume is zero the
/// volumes are treated as 1 and the arithmetic mean is returned. Empty input
/// is an error.
pub fn vwap<'a, I>(symbol: &str, tickers: I) -> FeederResult<Decimal>
where
    I: IntoIterator<Item = &'a TickerPrice>,
{
    let mut weighted_sum = Decimal::ZERO;
    let mut volume_sum = Decimal::ZERO;
    let mut price_sum = Decimal::ZERO;
    let mut count: i64 = 0;

    for ticker in tickers {
        weighted_sum += ticker.price * ticker.volume;
        volume_sum += ticker.volume;
        price_sum += ticker.price;
        count += 1;
    }

    if count == 0 {
        return Err(FeederError::NoPrices {
            symbol: symbol.to_string(),
        });
    }
    if volume_sum.is_zero() {
        return quo_int64(price_sum, count);
    }

    quo(weighted_sum, volume_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ticker(price: Decimal, volume: Decimal) -> TickerPrice {
        TickerPrice::from_decimals(price, volume, Utc::now()).unwrap()
    }

    #[test]
    fn test_vwap_weighted() {
        let tickers = [
            ticker(dec!(30000), dec!(10)),
            ticker(dec!(30010), dec!(10)),
            ticker(dec!(30020), dec!(100)),
        ];
        assert_eq!(vwap("BTC", tickers.iter()).unwrap(), dec!(30017.5));
    }

    #[test]
    fn test_vwap_equal_prices_ignore_volumes() {
        let tickers = [
            ticker(dec!(42), dec!(1)),
            ticker(dec!(42), dec!(999)),
            ticker(dec!(42), dec!(0)),
        ];
        assert_eq!(vwap("X", tickers.iter()).unwrap(), dec!(42));
    }

    #[test]
    fn test_vwap_zero_volume_falls_back_to_mean() {
        let tickers = [
            ticker(dec!(10), dec!(0)),
            ticker(dec!(20), dec!(0)),
            ticker(dec!(30), dec!(0)),
        ];
        assert_eq!(vwap("X", tickers.iter()).unwrap(), dec!(20));
    }

    #[test]
    fn test_vwap_empty_is_error() {
        let err = vwap("X", std::iter::empty::<&TickerPrice>()).unwrap_err();
        assert!(matches!(err, FeederError::NoPrices { .. }));
    }
}
