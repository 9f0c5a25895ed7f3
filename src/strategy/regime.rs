//! Market regime classification from a benchmark asset's trend.

use crate::exchange::{MarketData, Timeframe};
use crate::strategy::indicators;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument, warn};

/// Coarse market trend, recomputed once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketRegime {
    Bull,
    Bear,
    Neutral,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "BULL",
            MarketRegime::Bear => "BEAR",
            MarketRegime::Neutral => "NEUTRAL",
        }
    }

    pub fn is_bear(&self) -> bool {
        matches!(self, MarketRegime::Bear)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies the regime by comparing the benchmark's last daily close with its SMA.
pub struct RegimeClassifier {
    benchmark: String,
    sma_period: usize,
}

impl RegimeClassifier {
    pub fn new(benchmark: &str, sma_period: usize) -> Self {
        Self {
            benchmark: benchmark.to_string(),
            sma_period,
        }
    }

    /// Classify the current regime. Any data problem yields `Neutral`.
    #[instrument(skip(self, market), fields(benchmark = %self.benchmark))]
    pub async fn classify(&self, market: &dyn MarketData) -> MarketRegime {
        // Slack for missing days so the SMA window is usually full.
        let lookback = self.sma_period + 10;
        let closes: Vec<Decimal> = match market
            .historical_bars(&self.benchmark, Timeframe::Day, lookback)
            .await
        {
            Ok(bars) => bars.into_iter().map(|b| b.close).collect(),
            Err(e) => {
                warn!(error = %e, "Benchmark history unavailable, regime defaults to NEUTRAL");
                return MarketRegime::Neutral;
            }
        };

        let regime = classify_closes(&closes, self.sma_period);
        match (closes.last(), indicators::sma(&closes, self.sma_period)) {
            (Some(last), Some(sma)) => info!(
                regime = %regime,
                last_close = %last.round_dp(2),
                sma = %sma.round_dp(2),
                period = self.sma_period,
                "Market regime determined"
            ),
            _ => warn!(
                points = closes.len(),
                needed = self.sma_period,
                "Not enough benchmark history, regime defaults to NEUTRAL"
            ),
        }
        regime
    }
}

/// Last close above the SMA is BULL, below is BEAR; too little data or a tie is NEUTRAL.
pub fn classify_closes(closes: &[Decimal], period: usize) -> MarketRegime {
    let (Some(&last), Some(sma)) = (closes.last(), indicators::sma(closes, period)) else {
        return MarketRegime::Neutral;
    };
    if last > sma {
        MarketRegime::Bull
    } else if last < sma {
        MarketRegime::Bear
    } else {
        MarketRegime::Neutral
    }
}
