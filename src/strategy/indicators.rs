//! Standard technical indicators over decimal price series.
//!
//! All functions return `None` when the series is too short for the
//! requested period. Smoothing follows Wilder for RSI, ATR and ADX.

use crate::exchange::Bar;
use rust_decimal::Decimal;

/// Simple moving average of the last `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<Decimal>() / Decimal::from(period))
}

/// Exponential moving average series, seeded with the SMA of the first `period` values.
///
/// The returned series is aligned to `values[period - 1..]`.
pub fn ema_series(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = Decimal::TWO / Decimal::from(period + 1);
    let seed = values[..period].iter().sum::<Decimal>() / Decimal::from(period);

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

/// Wilder's RSI of the closes.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let p = Decimal::from(period);
    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (mut avg_gain, mut avg_loss) = changes[..period]
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(g, l), &c| {
            if c > Decimal::ZERO {
                (g + c, l)
            } else {
                (g, l - c)
            }
        });
    avg_gain /= p;
    avg_loss /= p;

    for &c in &changes[period..] {
        let (gain, loss) = if c > Decimal::ZERO {
            (c, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -c)
        };
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
    }

    if avg_loss.is_zero() {
        return Some(if avg_gain.is_zero() {
            Decimal::from(50)
        } else {
            Decimal::ONE_HUNDRED
        });
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// True range of each bar after the first.
fn true_ranges(bars: &[Bar]) -> Vec<Decimal> {
    bars.windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Wilder's average true range.
pub fn atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    let tr = true_ranges(bars);
    if period == 0 || tr.len() < period {
        return None;
    }
    let p = Decimal::from(period);
    let mut value = tr[..period].iter().sum::<Decimal>() / p;
    for &t in &tr[period..] {
        value = (value * (p - Decimal::ONE) + t) / p;
    }
    Some(value)
}

/// MACD histogram (MACD line minus signal line) at the last close.
pub fn macd_histogram(
    closes: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<Decimal> {
    if fast == 0 || fast >= slow || closes.len() < slow + signal - 1 {
        return None;
    }
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    // Align the fast series to the slow one (both end on the last close).
    let offset = slow - fast;
    let macd_line: Vec<Decimal> = slow_ema
        .iter()
        .zip(&fast_ema[offset..])
        .map(|(s, f)| *f - *s)
        .collect();
    let signal_line = ema_series(&macd_line, signal);
    Some(*macd_line.last()? - *signal_line.last()?)
}

/// Wilder's average directional index.
pub fn adx(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }
    let p = Decimal::from(period);
    let tr = true_ranges(bars);
    let (plus_dm, minus_dm): (Vec<Decimal>, Vec<Decimal>) = bars
        .windows(2)
        .map(|w| {
            let up = w[1].high - w[0].high;
            let down = w[0].low - w[1].low;
            let plus = if up > down && up > Decimal::ZERO { up } else { Decimal::ZERO };
            let minus = if down > up && down > Decimal::ZERO { down } else { Decimal::ZERO };
            (plus, minus)
        })
        .unzip();

    let mut sm_tr: Decimal = tr[..period].iter().sum();
    let mut sm_plus: Decimal = plus_dm[..period].iter().sum();
    let mut sm_minus: Decimal = minus_dm[..period].iter().sum();

    let dx = |sm_tr: Decimal, sm_plus: Decimal, sm_minus: Decimal| -> Decimal {
        if sm_tr.is_zero() {
            return Decimal::ZERO;
        }
        let plus_di = Decimal::ONE_HUNDRED * sm_plus / sm_tr;
        let minus_di = Decimal::ONE_HUNDRED * sm_minus / sm_tr;
        let sum = plus_di + minus_di;
        if sum.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED * (plus_di - minus_di).abs() / sum
        }
    };

    let mut dxs = vec![dx(sm_tr, sm_plus, sm_minus)];
    for i in period..tr.len() {
        sm_tr = sm_tr - sm_tr / p + tr[i];
        sm_plus = sm_plus - sm_plus / p + plus_dm[i];
        sm_minus = sm_minus - sm_minus / p + minus_dm[i];
        dxs.push(dx(sm_tr, sm_plus, sm_minus));
    }

    if dxs.len() < period {
        return None;
    }
    let mut value = dxs[..period].iter().sum::<Decimal>() / p;
    for &d in &dxs[period..] {
        value = (value * (p - Decimal::ONE) + d) / p;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bars_from_closes(closes: &[Decimal], spread: Decimal) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + Duration::hours(i as i64),
                open: c,
                high: c + spread,
                low: c - spread,
                close: c,
                volume: dec!(10),
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let values = [dec!(1), dec!(2), dec!(3), dec!(4)];
        assert_eq!(sma(&values, 2), Some(dec!(3.5)));
        assert_eq!(sma(&values, 5), None);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<Decimal> = (1..=30).map(Decimal::from).collect();
        assert_eq!(rsi(&rising, 14), Some(dec!(100)));

        let falling: Vec<Decimal> = (1..=30).rev().map(Decimal::from).collect();
        assert_eq!(rsi(&falling, 14), Some(Decimal::ZERO));

        let flat = vec![dec!(5); 30];
        assert_eq!(rsi(&flat, 14), Some(dec!(50)));
    }

    #[test]
    fn test_rsi_alternating_is_midrange() {
        let closes: Vec<Decimal> = (0..40)
            .map(|i| if i % 2 == 0 { dec!(100) } else { dec!(101) })
            .collect();
        let value = rsi(&closes, 14).unwrap();
        assert!(value > dec!(40) && value < dec!(60), "rsi = {}", value);
    }

    #[test]
    fn test_atr_of_constant_range() {
        let closes = vec![dec!(100); 30];
        let bars = bars_from_closes(&closes, dec!(2));
        assert_eq!(atr(&bars, 14), Some(dec!(4)));
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let rising: Vec<Decimal> = (0..60).map(|i| dec!(100) + Decimal::from(i * i) / dec!(10)).collect();
        assert!(macd_histogram(&rising, 12, 26, 9).unwrap() > Decimal::ZERO);

        // Accelerating fall mirrors the accelerating rise
        let falling: Vec<Decimal> = rising.iter().map(|c| dec!(1000) - *c).collect();
        assert!(macd_histogram(&falling, 12, 26, 9).unwrap() < Decimal::ZERO);

        assert!(macd_histogram(&rising[..30], 12, 26, 9).is_none());
    }

    #[test]
    fn test_adx_strong_trend_vs_chop() {
        let trend: Vec<Decimal> = (0..60).map(|i| dec!(100) + Decimal::from(i)).collect();
        let trending = adx(&bars_from_closes(&trend, dec!(0.5)), 14).unwrap();
        assert!(trending > dec!(25), "adx = {}", trending);

        let chop: Vec<Decimal> = (0..60)
            .map(|i| if i % 2 == 0 { dec!(100) } else { dec!(101) })
            .collect();
        let choppy = adx(&bars_from_closes(&chop, dec!(0.5)), 14).unwrap();
        assert!(choppy < trending);
    }
}
