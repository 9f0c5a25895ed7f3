//! One trading cycle: regime, stops, scan, score, decide, act.
//!
//! Steps run strictly in order and every external failure is logged and
//! absorbed where a conservative default exists. A cycle opens at most one
//! new position and always ends with a single logged [`CycleOutcome`].

use crate::config::Config;
use crate::exchange::{Brokerage, MarketData};
use crate::news::{NewsScorer, NewsVerdict};
use crate::persistence::{BotState, PositionMeta, StateError, StateStore, TradeHistory};
use crate::risk::PositionManager;
use crate::strategy::regime::{MarketRegime, RegimeClassifier};
use crate::strategy::scanner::{Candidate, CandidateScanner};
use crate::strategy::technical::{TechnicalScore, TechnicalScorer};
use crate::utils::weighted_sum;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Bought {
        symbol: String,
        notional: Decimal,
        score: Decimal,
    },
    BelowThreshold {
        symbol: String,
        score: Decimal,
        threshold: Decimal,
    },
    NoCandidates,
    EntriesHalted,
    AccountUnavailable,
    PositionsUnavailable,
    SizeTooSmall {
        symbol: String,
        notional: Decimal,
    },
    OrderFailed {
        symbol: String,
    },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Bought {
                symbol,
                notional,
                score,
            } => write!(f, "bought {} for ${} (score {})", symbol, notional, score.round_dp(1)),
            CycleOutcome::BelowThreshold {
                symbol,
                score,
                threshold,
            } => write!(
                f,
                "best candidate {} scored {} below threshold {}",
                symbol,
                score.round_dp(1),
                threshold
            ),
            CycleOutcome::NoCandidates => f.write_str("no eligible candidates"),
            CycleOutcome::EntriesHalted => f.write_str("new entries halted in bear market"),
            CycleOutcome::AccountUnavailable => f.write_str("account unavailable"),
            CycleOutcome::PositionsUnavailable => f.write_str("positions unavailable"),
            CycleOutcome::SizeTooSmall { symbol, notional } => {
                write!(f, "order for {} too small (${})", symbol, notional)
            }
            CycleOutcome::OrderFailed { symbol } => write!(f, "order for {} failed", symbol),
        }
    }
}

/// A candidate that made it through both scoring stages.
#[derive(Debug, Clone)]
struct ScoredCandidate {
    symbol: String,
    technical: TechnicalScore,
    fused: Decimal,
}

/// `ai × weight_ai + tech × weight_tech`.
pub fn fuse_scores(ai: Decimal, tech: Decimal, weight_ai: Decimal, weight_tech: Decimal) -> Decimal {
    weighted_sum(&[(ai, weight_ai), (tech, weight_tech)])
}

/// Runs trading cycles against a broker and market data source.
pub struct CycleOrchestrator {
    config: Config,
    regime: RegimeClassifier,
    positions: PositionManager,
    scanner: CandidateScanner,
    technical: TechnicalScorer,
    news: NewsScorer,
}

impl CycleOrchestrator {
    pub fn new(config: Config, news: NewsScorer) -> Self {
        Self {
            regime: RegimeClassifier::new(
                &config.market.benchmark_symbol,
                config.market.regime_sma_period,
            ),
            positions: PositionManager::new(config.risk.clone(), config.scoring.bar_lookback),
            scanner: CandidateScanner::new(&config.market),
            technical: TechnicalScorer::new(config.scoring.clone()),
            news,
            config,
        }
    }

    /// Lock, load state, run one cycle and save.
    ///
    /// Returns [`StateError::Locked`] (inside the `anyhow` error) when another
    /// cycle is in progress.
    pub async fn run_locked(
        &mut self,
        broker: &dyn Brokerage,
        market: &dyn MarketData,
        store: &StateStore,
        history: &TradeHistory,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CycleOutcome> {
        let _lock = store.lock(now)?;
        let mut state = store.load_or_recover(now);
        let outcome = self.run_cycle(broker, market, &mut state, history, now).await;
        store.save(&state)?;
        Ok(outcome)
    }

    /// Run one cycle over in-memory state.
    pub async fn run_cycle(
        &mut self,
        broker: &dyn Brokerage,
        market: &dyn MarketData,
        state: &mut BotState,
        history: &TradeHistory,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let outcome = self.cycle_inner(broker, market, state, history, now).await;
        let open_breakers = self.news.open_breakers(now);
        info!(
            outcome = %outcome,
            news_evaluations = self.news.evaluations(),
            open_breakers = ?open_breakers,
            "🏁 [CYCLE] {}",
            outcome
        );
        outcome
    }

    async fn cycle_inner(
        &mut self,
        broker: &dyn Brokerage,
        market: &dyn MarketData,
        state: &mut BotState,
        history: &TradeHistory,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        // ═══════════════════════════════════════════════════════════════
        // PHASE 1: Regime
        // ═══════════════════════════════════════════════════════════════
        let regime = self.regime.classify(market).await;
        info!("🧭 [REGIME] Market regime: {}", regime);
        self.news.begin_cycle();

        // ═══════════════════════════════════════════════════════════════
        // PHASE 2: Manage open positions
        // ═══════════════════════════════════════════════════════════════
        let report = match self
            .positions
            .manage(broker, market, state, history, regime, now)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!("❌ [RISK] {:#}", e);
                return CycleOutcome::PositionsUnavailable;
            }
        };
        let held: HashSet<String> = report.held.iter().cloned().collect();

        if regime.is_bear() && self.config.capital.halt_entries_in_bear {
            warn!("🐻 [ENTRY] Bear market, new entries halted");
            return CycleOutcome::EntriesHalted;
        }

        let account = match broker.get_account().await {
            Ok(account) => account,
            Err(e) => {
                error!("❌ [ACCOUNT] {:#}", e);
                return CycleOutcome::AccountUnavailable;
            }
        };

        // ═══════════════════════════════════════════════════════════════
        // PHASE 3: Scan and score
        // ═══════════════════════════════════════════════════════════════
        let candidates = match self.scanner.scan(broker, market).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("⚠️  [SCAN] {:#}", e);
                return CycleOutcome::NoCandidates;
            }
        };
        info!("📡 [SCAN] {} movers ranked", candidates.len());

        let best = self.select_best(&candidates, &held, state, market, regime, now).await;

        // ═══════════════════════════════════════════════════════════════
        // PHASE 4: Decide and act
        // ═══════════════════════════════════════════════════════════════
        let Some(best) = best else {
            return CycleOutcome::NoCandidates;
        };
        let threshold = self.config.scoring.entry_threshold.get(regime);
        if best.fused < threshold {
            return CycleOutcome::BelowThreshold {
                symbol: best.symbol,
                score: best.fused,
                threshold,
            };
        }

        let fraction = self.config.capital.position_size_fraction.get(regime);
        let notional = (account.equity * fraction)
            .min(account.buying_power)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if notional < self.config.capital.min_order_notional {
            return CycleOutcome::SizeTooSmall {
                symbol: best.symbol,
                notional,
            };
        }

        info!(
            "💰 [ENTRY] Buying {} for ${} (score {}, equity ${}, cash ${})",
            best.symbol,
            notional,
            best.fused.round_dp(1),
            account.equity.round_dp(2),
            account.cash.round_dp(2)
        );
        match broker.submit_market_buy(&best.symbol, notional).await {
            Ok(fill) => {
                let initial_high = fill.filled_avg_price.unwrap_or(Decimal::ZERO);
                state.positions.insert(
                    best.symbol.clone(),
                    PositionMeta::new(best.technical.atr, initial_high, Some(regime)),
                );
                info!(
                    symbol = %best.symbol,
                    order_id = %fill.order_id,
                    status = %fill.status,
                    fill_price = ?fill.filled_avg_price,
                    "✅ [ENTRY] Order accepted"
                );
                CycleOutcome::Bought {
                    symbol: best.symbol,
                    notional,
                    score: best.fused,
                }
            }
            Err(e) => {
                error!("❌ [ENTRY] Order for {} failed: {:#}", best.symbol, e);
                CycleOutcome::OrderFailed {
                    symbol: best.symbol,
                }
            }
        }
    }

    /// Walk the ranked movers and keep the highest fused score.
    async fn select_best(
        &mut self,
        candidates: &[Candidate],
        held: &HashSet<String>,
        state: &mut BotState,
        market: &dyn MarketData,
        regime: MarketRegime,
        now: DateTime<Utc>,
    ) -> Option<ScoredCandidate> {
        let scoring = &self.config.scoring;
        let cooldown = self.config.cooldown_window(regime);
        let mut best: Option<ScoredCandidate> = None;

        for candidate in candidates {
            let symbol = candidate.symbol.as_str();
            if held.contains(symbol) || state.positions.contains_key(symbol) {
                debug!(%symbol, "Skip: already held");
                continue;
            }
            if state.is_cooling_down(symbol, now, cooldown) {
                info!(%symbol, "Skip: cooling down");
                continue;
            }
            if candidate.volume_usd < scoring.min_volume_usd {
                info!(
                    %symbol,
                    session_volume = %candidate.volume_usd.round_dp(0),
                    floor = %scoring.min_volume_usd,
                    "Skip: session volume below liquidity floor"
                );
                continue;
            }
            if !self.news.has_budget() {
                info!(%symbol, "Skip: news budget exhausted");
                continue;
            }

            let technical = self
                .technical
                .score(market, symbol, candidate.volume_usd, regime)
                .await;
            if technical.score < scoring.technical_floor {
                info!(
                    %symbol,
                    change_pct = %candidate.change_pct.round_dp(2),
                    tech = %technical.score,
                    rsi = %technical.rsi.round_dp(1),
                    "Skip: technical score below floor"
                );
                continue;
            }

            let verdict: NewsVerdict = self.news.score(symbol, regime, state, now).await;
            let fused = fuse_scores(
                Decimal::from(verdict.score),
                technical.score,
                scoring.weight_ai,
                scoring.weight_tech,
            );
            info!(
                %symbol,
                change_pct = %candidate.change_pct.round_dp(2),
                tech = %technical.score,
                ai = verdict.score,
                cached = verdict.cached,
                fused = %fused.round_dp(1),
                reason = %verdict.reason,
                "📰 [SCORE] Candidate considered"
            );

            if best.as_ref().map_or(true, |b| fused > b.fused) {
                best = Some(ScoredCandidate {
                    symbol: candidate.symbol.clone(),
                    technical,
                    fused,
                });
            }
        }

        if let Some(b) = &best {
            info!(symbol = %b.symbol, fused = %b.fused.round_dp(1), "🎯 [SCORE] Best candidate");
        }
        best
    }
}

/// True when the error is the cycle lock being held by another run.
pub fn is_lock_contention(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StateError>(), Some(StateError::Locked(_)))
}
