//! Decimal arithmetic helpers for prices and scores.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Percent change from `from` to `to` (5 = +5%). Zero when `from` is zero.
pub fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    safe_div(to - from, from) * dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Clamp a score to the 0..=100 band.
pub fn clamp_score(score: Decimal) -> Decimal {
    score.clamp(Decimal::ZERO, dec!(100))
}

/// Sum of value × weight pairs.
pub fn weighted_sum(values: &[(Decimal, Decimal)]) -> Decimal {
    values.iter().map(|(value, weight)| value * weight).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(dec!(100), dec!(105)), dec!(5));
        assert_eq!(pct_change(dec!(200), dec!(150)), dec!(-25));
        assert_eq!(pct_change(Decimal::ZERO, dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(dec!(-10)), dec!(0));
        assert_eq!(clamp_score(dec!(140)), dec!(100));
        assert_eq!(clamp_score(dec!(42.5)), dec!(42.5));
    }

    #[test]
    fn test_weighted_sum() {
        let fused = weighted_sum(&[(dec!(50), dec!(0.4)), (dec!(90), dec!(0.6))]);
        assert_eq!(fused, dec!(74));
    }
}
