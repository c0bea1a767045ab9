//! Fixed-point decimal helpers.
//!
//! All prices and volumes flow through `rust_decimal::Decimal` with a
//! canonical 18-fractional-digit form used for persistence and the on-wire
//! vote string. Division truncates toward zero at the canonical scale;
//! square roots use Newton iteration with a fixed cap.

use crate::error::{FeederError, FeederResult};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Fractional digits of the canonical wire and persistence form.
pub const DECIMAL_SCALE: u32 = 18;

/// Newton iteration cap for [`approx_sqrt`].
const SQRT_MAX_ITERATIONS: u32 = 100;

/// Parse `"<int>[.<frac>]"` into a decimal.
pub fn parse_decimal(value: &str) -> FeederResult<Decimal> {
    Decimal::from_str(value.trim()).map_err(|e| FeederError::InvalidDecimal {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Canonical `"<int>.<18-digit-frac>"` form. Excess fractional digits are
/// truncated toward zero, never rounded.
pub fn canonical(value: Decimal) -> String {
    format!("{:.prec$}", value.trunc_with_scale(DECIMAL_SCALE), prec = DECIMAL_SCALE as usize)
}

/// Division truncating toward zero at the canonical scale.
pub fn quo(numerator: Decimal, denominator: Decimal) -> FeederResult<Decimal> {
    let quotient = numerator
        .checked_div(denominator)
        .ok_or_else(|| FeederError::InvalidDecimal {
            value: format!("{} / {}", numerator, denominator),
            reason: "division by zero or overflow".to_string(),
        })?;
    Ok(quotient.trunc_with_scale(DECIMAL_SCALE))
}

/// Multiply by an integer weight (derivative time weights are whole seconds).
pub fn mul_int64(value: Decimal, factor: i64) -> Decimal {
    value * Decimal::from(factor)
}

/// Divide by an integer weight, truncating at the canonical scale.
pub fn quo_int64(value: Decimal, divisor: i64) -> FeederResult<Decimal> {
    quo(value, Decimal::from(divisor))
}

/// Newton square root. Terminates on an exact root, when successive iterates
/// agree to the last canonical digit, or after [`SQRT_MAX_ITERATIONS`].
/// A negative input yields the negated root of its absolute value.
pub fn approx_sqrt(value: Decimal) -> FeederResult<Decimal> {
    if value.is_zero() {
        return Ok(Decimal::ZERO);
    }
    if value.is_sign_negative() {
        return Ok(-approx_sqrt(value.abs())?);
    }

    let two = Decimal::from(2);
    let ulp = Decimal::new(1, DECIMAL_SCALE);
    let mut guess = if value > Decimal::ONE {
        quo(value, two)?
    } else {
        value
    };

    for _ in 0..SQRT_MAX_ITERATIONS {
        if guess.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let next = quo(guess + quo(value, guess)?, two)?;
        if next.checked_mul(next) == Some(value) {
            return Ok(next);
        }
        // truncation can make the iterates straddle the root by one digit
        if (next - guess).abs() <= ulp {
            return Ok(next);
        }
        guess = next;
    }

    Ok(guess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("10").unwrap(), dec!(10));
        assert_eq!(parse_decimal("0.999").unwrap(), dec!(0.999));
        assert_eq!(parse_decimal(" 30017.5 ").unwrap(), dec!(30017.5));
        assert!(parse_decimal("not-a-number").is_err());
    }

    #[test]
    fn test_canonical_pads_to_scale() {
        assert_eq!(canonical(dec!(10.989)), "10.989000000000000000");
        assert_eq!(canonical(Decimal::ZERO), "0.000000000000000000");
    }

    #[test]
    fn test_canonical_truncates_not_rounds() {
        // 19 fractional digits, last digit 9 must be cut, not carried
        let value = Decimal::from_str("1.9999999999999999999").unwrap();
        assert_eq!(canonical(value), "1.999999999999999999");
    }

    #[test]
    fn test_quo_truncates_toward_zero() {
        let q = quo(dec!(11000), dec!(1010)).unwrap();
        assert_eq!(canonical(q), "10.891089108910891089");

        let q = quo(dec!(-1), dec!(3)).unwrap();
        // truncation toward zero, not floor
        assert_eq!(canonical(q), "-0.333333333333333333");
    }

    #[test]
    fn test_quo_by_zero_errors() {
        assert!(quo(dec!(1), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_approx_sqrt() {
        assert_eq!(approx_sqrt(Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(approx_sqrt(dec!(4)).unwrap().round_dp(12), dec!(2));
        assert_eq!(approx_sqrt(dec!(2)).unwrap().round_dp(12), dec!(1.414213562373));
        // mirrored for negative input
        assert_eq!(approx_sqrt(dec!(-4)).unwrap().round_dp(12), dec!(-2));
    }

    #[test]
    fn test_int64_helpers() {
        assert_eq!(mul_int64(dec!(2.5), 4), dec!(10));
        assert_eq!(quo_int64(dec!(30), 4).unwrap(), dec!(7.5));
    }
}
