//! Regime-aware technical scoring of a single symbol.
//!
//! The score starts at a neutral 50 and collects additive adjustments from
//! RSI, MACD histogram, ADX and volume. In a BEAR regime the bonuses only
//! count when the move is confirmed by volume and a positive MACD, and the
//! mid-range RSI band is penalised.

use crate::config::ScoringConfig;
use crate::exchange::{Bar, MarketData, Timeframe};
use crate::strategy::indicators;
use crate::strategy::MarketRegime;
use crate::utils::clamp_score;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, instrument, warn};

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
/// Hourly bars summed for the bar-derived 24h volume.
const VOLUME_WINDOW: usize = 24;

/// Why a score came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechVerdict {
    Scored,
    InsufficientData,
    Illiquid,
}

/// Indicator values at the latest bar.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: Decimal,
    pub atr: Decimal,
    /// `None` when the history is too short for MACD(12,26,9)
    pub macd_histogram: Option<Decimal>,
    /// `None` when the history is too short for ADX(14)
    pub adx: Option<Decimal>,
}

impl IndicatorSnapshot {
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        Some(Self {
            rsi: indicators::rsi(&closes, RSI_PERIOD)?,
            atr: indicators::atr(bars, ATR_PERIOD)?,
            macd_histogram: indicators::macd_histogram(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
            adx: indicators::adx(bars, ADX_PERIOD),
        })
    }
}

/// Result of scoring one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct TechnicalScore {
    pub score: Decimal,
    pub atr: Decimal,
    pub rsi: Decimal,
    /// Effective 24h volume in quote currency
    pub volume_usd: Decimal,
    pub verdict: TechVerdict,
}

impl TechnicalScore {
    fn insufficient(volume_usd: Decimal) -> Self {
        Self {
            score: Decimal::ZERO,
            atr: Decimal::ZERO,
            rsi: Decimal::ZERO,
            volume_usd,
            verdict: TechVerdict::InsufficientData,
        }
    }
}

/// Scores symbols from hourly bar history.
pub struct TechnicalScorer {
    config: ScoringConfig,
}

impl TechnicalScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Fetch hourly history and score it. Never fails: missing data scores 0.
    #[instrument(skip(self, market), fields(regime = %regime))]
    pub async fn score(
        &self,
        market: &dyn MarketData,
        symbol: &str,
        external_volume: Decimal,
        regime: MarketRegime,
    ) -> TechnicalScore {
        match market
            .historical_bars(symbol, Timeframe::Hour, self.config.bar_lookback)
            .await
        {
            Ok(bars) => self.score_bars(&bars, external_volume, regime),
            Err(e) => {
                warn!(%symbol, error = %e, "Bar history unavailable");
                TechnicalScore::insufficient(external_volume)
            }
        }
    }

    /// Score an already fetched bar history (oldest first).
    pub fn score_bars(
        &self,
        bars: &[Bar],
        external_volume: Decimal,
        regime: MarketRegime,
    ) -> TechnicalScore {
        let volume_usd = external_volume.max(bar_quote_volume(bars));
        if bars.len() < self.config.min_bars {
            debug!(bars = bars.len(), needed = self.config.min_bars, "Insufficient data");
            return TechnicalScore::insufficient(volume_usd);
        }
        let Some(snapshot) = IndicatorSnapshot::from_bars(bars) else {
            return TechnicalScore::insufficient(volume_usd);
        };

        let score = self.score_indicators(&snapshot, volume_usd, regime);
        let verdict = if volume_usd < self.config.min_volume_usd {
            TechVerdict::Illiquid
        } else {
            TechVerdict::Scored
        };
        TechnicalScore {
            score,
            atr: snapshot.atr,
            rsi: snapshot.rsi,
            volume_usd,
            verdict,
        }
    }

    /// Apply the regime rules to an indicator snapshot.
    pub fn score_indicators(
        &self,
        ind: &IndicatorSnapshot,
        volume_usd: Decimal,
        regime: MarketRegime,
    ) -> Decimal {
        if volume_usd < self.config.min_volume_usd {
            return Decimal::ZERO;
        }
        let macd = ind.macd_histogram.unwrap_or(Decimal::ZERO);
        let volume_confirmed = volume_usd >= self.config.confirm_volume_usd;
        let rsi = ind.rsi;
        let mut score = dec!(50);

        match regime {
            MarketRegime::Bull | MarketRegime::Neutral => {
                if rsi < dec!(30) {
                    score += dec!(25);
                } else if rsi < dec!(40) {
                    score += dec!(15);
                } else if rsi < dec!(50) {
                    score += dec!(5);
                } else if rsi > dec!(70) {
                    score -= dec!(20);
                }

                if macd > Decimal::ZERO {
                    score += dec!(10);
                } else if macd < Decimal::ZERO {
                    score -= dec!(10);
                }

                if let Some(adx) = ind.adx {
                    if adx > dec!(25) {
                        score += dec!(10);
                    } else if adx < dec!(15) {
                        score -= dec!(5);
                    }
                }

                if volume_confirmed {
                    score += dec!(5);
                }
            }
            MarketRegime::Bear => {
                let confirmed = volume_confirmed && macd > Decimal::ZERO;

                if rsi < dec!(25) {
                    if confirmed {
                        score += dec!(25);
                    }
                } else if rsi < dec!(30) {
                    if confirmed {
                        score += dec!(15);
                    }
                } else if rsi < dec!(45) {
                    score -= dec!(15);
                } else if rsi > dec!(70) {
                    score -= dec!(20);
                } else {
                    score -= dec!(5);
                }

                if confirmed {
                    score += dec!(10);
                } else if macd < Decimal::ZERO {
                    score -= dec!(10);
                }

                if let Some(adx) = ind.adx {
                    if adx > dec!(25) && confirmed {
                        score += dec!(5);
                    } else if adx < dec!(15) {
                        score -= dec!(5);
                    }
                }
            }
        }

        clamp_score(score)
    }
}

/// Σ close × volume over the most recent hourly bars.
fn bar_quote_volume(bars: &[Bar]) -> Decimal {
    let start = bars.len().saturating_sub(VOLUME_WINDOW);
    bars[start..].iter().map(|b| b.close * b.volume).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn scorer() -> TechnicalScorer {
        TechnicalScorer::new(ScoringConfig::default())
    }

    fn snapshot(rsi: Decimal, macd: Decimal, adx: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            atr: dec!(1),
            macd_histogram: Some(macd),
            adx: Some(adx),
        }
    }

    fn hourly_bars(n: usize, volume: Decimal) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let c = dec!(100) + Decimal::from(i % 3);
                Bar {
                    timestamp: start + Duration::hours(i as i64),
                    open: c,
                    high: c + dec!(1),
                    low: c - dec!(1),
                    close: c,
                    volume,
                }
            })
            .collect()
    }

    #[test]
    fn test_bear_confirmed_oversold_scores_high() {
        let s = scorer().score_indicators(
            &snapshot(dec!(20), dec!(0.5), dec!(30)),
            dec!(2_000_000),
            MarketRegime::Bear,
        );
        assert_eq!(s, dec!(90));
        assert!(s >= dec!(80));
    }

    #[test]
    fn test_bull_neutral_rsi_with_negative_macd() {
        let scorer = scorer();
        let ind = snapshot(dec!(50), dec!(-0.5), dec!(10));

        let liquid = scorer.score_indicators(&ind, dec!(600_000), MarketRegime::Bull);
        assert_eq!(liquid, dec!(35));

        let confirmed = scorer.score_indicators(&ind, dec!(2_000_000), MarketRegime::Bull);
        assert_eq!(confirmed, dec!(40));
        assert!(confirmed >= dec!(30) && confirmed <= dec!(50));
    }

    #[test]
    fn test_volume_floor_forces_zero() {
        let s = scorer().score_indicators(
            &snapshot(dec!(10), dec!(1), dec!(40)),
            dec!(1),
            MarketRegime::Bull,
        );
        assert_eq!(s, Decimal::ZERO);
    }

    #[test]
    fn test_bear_unconfirmed_gets_no_bonus() {
        // Oversold but thin volume: no RSI, MACD or ADX bonus
        let s = scorer().score_indicators(
            &snapshot(dec!(20), dec!(0.5), dec!(30)),
            dec!(600_000),
            MarketRegime::Bear,
        );
        assert_eq!(s, dec!(50));
    }

    #[test]
    fn test_bear_falling_knife_band() {
        let s = scorer().score_indicators(
            &snapshot(dec!(35), dec!(-1), dec!(20)),
            dec!(2_000_000),
            MarketRegime::Bear,
        );
        assert_eq!(s, dec!(25));
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let result = scorer().score_bars(&hourly_bars(29, dec!(1000)), Decimal::ZERO, MarketRegime::Bull);
        assert_eq!(result.score, Decimal::ZERO);
        assert_eq!(result.verdict, TechVerdict::InsufficientData);
    }

    #[test]
    fn test_bar_volume_used_when_larger() {
        // 24 bars × ~101 × 1000 ≈ $2.4M derived from bars
        let result = scorer().score_bars(&hourly_bars(60, dec!(1000)), dec!(1), MarketRegime::Neutral);
        assert_eq!(result.verdict, TechVerdict::Scored);
        assert!(result.volume_usd > dec!(2_000_000));
        assert!(result.atr > Decimal::ZERO);
    }

    #[test]
    fn test_illiquid_history_scores_zero() {
        let result = scorer().score_bars(&hourly_bars(60, dec!(1)), dec!(100), MarketRegime::Bull);
        assert_eq!(result.score, Decimal::ZERO);
        assert_eq!(result.verdict, TechVerdict::Illiquid);
    }

    #[tokio::test]
    async fn test_fetch_failure_scores_zero() {
        let mock = MockExchange::new(dec!(1000));
        mock.fail_bars("SOL/USD").await;
        let result = scorer()
            .score(&mock, "SOL/USD", dec!(5_000_000), MarketRegime::Bull)
            .await;
        assert_eq!(result.score, Decimal::ZERO);
        assert_eq!(result.verdict, TechVerdict::InsufficientData);
    }

    proptest! {
        #[test]
        fn prop_bear_never_exceeds_bull(
            rsi in 0u32..=100,
            macd in -50i64..=50,
            adx in 0u32..=60,
            volume in 0u64..3_000_000,
        ) {
            let scorer = scorer();
            let ind = snapshot(Decimal::from(rsi), Decimal::new(macd, 1), Decimal::from(adx));
            let volume = Decimal::from(volume);
            let bull = scorer.score_indicators(&ind, volume, MarketRegime::Bull);
            let bear = scorer.score_indicators(&ind, volume, MarketRegime::Bear);
            prop_assert!(bear <= bull, "bear {} > bull {}", bear, bull);
            prop_assert!(bull >= Decimal::ZERO && bull <= dec!(100));
        }
    }
}
