//! Per-cycle management of open positions.
//!
//! For every broker position:
//! 1. Raise the high watermark with the latest price
//! 2. Move into profit lock once the activation threshold is reached
//! 3. Compute the stop and flatten when it is hit
//!
//! Positions without metadata are adopted with an ATR from hourly bars.
//! Without a fresh price (or when adoption fails) only the emergency check runs,
//! using the broker's own mark.

use crate::config::RiskConfig;
use crate::exchange::{Brokerage, MarketData, Position, Timeframe};
use crate::persistence::{BotState, PositionMeta, TradeHistory, TradeRecord};
use crate::risk::stops::{
    breaches_emergency, compute_stop, reaches_profit_lock, StopKind, StopParams,
};
use crate::strategy::{indicators, MarketRegime};
use crate::utils::pct_change;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, instrument, warn};

const ATR_PERIOD: usize = 14;

/// What happened to the book this cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManageReport {
    /// Symbols still held after the pass
    pub held: Vec<String>,
    pub closed: Vec<TradeRecord>,
    pub adopted: Vec<String>,
    /// Metadata dropped for positions closed outside the bot
    pub reconciled: Vec<String>,
    /// Positions checked only against the emergency stop
    pub blind: usize,
}

/// Runs stop management over the broker's open positions.
pub struct PositionManager {
    risk: RiskConfig,
    bar_lookback: usize,
}

impl PositionManager {
    pub fn new(risk: RiskConfig, bar_lookback: usize) -> Self {
        Self { risk, bar_lookback }
    }

    /// Manage all open positions. Fails only when the broker cannot list positions.
    #[instrument(skip_all, fields(regime = %regime))]
    pub async fn manage(
        &self,
        broker: &dyn Brokerage,
        market: &dyn MarketData,
        state: &mut BotState,
        history: &TradeHistory,
        regime: MarketRegime,
        now: DateTime<Utc>,
    ) -> Result<ManageReport> {
        let positions = broker
            .list_positions()
            .await
            .context("Failed to list open positions")?;

        let mut report = ManageReport {
            reconciled: reconcile(state, &positions, now),
            ..ManageReport::default()
        };

        if positions.is_empty() {
            info!("No open positions");
            return Ok(report);
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let prices: HashMap<String, Decimal> = match market.latest_snapshots(&symbols).await {
            Ok(snapshots) => snapshots.into_iter().map(|(s, snap)| (s, snap.price)).collect(),
            Err(e) => {
                warn!(error = %e, "Snapshots unavailable, positions fall back to the emergency check");
                HashMap::new()
            }
        };

        let params = StopParams::for_regime(&self.risk, regime);
        for position in &positions {
            if !state.positions.contains_key(&position.symbol) {
                if let Some(meta) = self.adopt(market, position).await {
                    state.positions.insert(position.symbol.clone(), meta);
                    report.adopted.push(position.symbol.clone());
                }
            }

            let decision = match (prices.get(&position.symbol), state.positions.get_mut(&position.symbol)) {
                (Some(&price), Some(meta)) => Self::evaluate(position, price, meta, &params),
                _ => {
                    report.blind += 1;
                    self.blind_check(position)
                }
            };

            match decision {
                Some((kind, price)) => {
                    if let Some(record) = self
                        .close(broker, state, history, position, kind, price, now)
                        .await
                    {
                        report.closed.push(record);
                    } else {
                        report.held.push(position.symbol.clone());
                    }
                }
                None => report.held.push(position.symbol.clone()),
            }
        }

        info!(
            open = report.held.len(),
            closed = report.closed.len(),
            adopted = report.adopted.len(),
            blind = report.blind,
            "Positions managed"
        );
        Ok(report)
    }

    /// Update metadata and decide. Returns the stop kind and price when the stop is hit.
    fn evaluate(
        position: &Position,
        price: Decimal,
        meta: &mut PositionMeta,
        params: &StopParams,
    ) -> Option<(StopKind, Decimal)> {
        meta.observe_price(price);
        let profit_pct = pct_change(position.entry_price, price);
        if reaches_profit_lock(profit_pct, meta.is_risk_free(), params) && meta.mark_risk_free() {
            info!(
                symbol = %position.symbol,
                profit_pct = %profit_pct.round_dp(2),
                "Position is risk-free, switching to profit lock"
            );
        }

        let stop = compute_stop(
            position.entry_price,
            meta.highest_price(),
            meta.atr_at_entry(),
            meta.is_risk_free(),
            params,
        );
        info!(
            symbol = %position.symbol,
            price = %price,
            stop = %stop.price.round_dp(6),
            distance_pct = %stop.distance_pct(price).round_dp(2),
            state = %stop.state,
            high = %meta.highest_price(),
            "Stop check"
        );
        stop.is_hit(price).then_some((stop.kind, price))
    }

    /// Emergency-only check against the broker mark.
    fn blind_check(&self, position: &Position) -> Option<(StopKind, Decimal)> {
        let price = position.current_price;
        let breached = breaches_emergency(price, position.entry_price, self.risk.emergency_stop_fraction);
        warn!(
            symbol = %position.symbol,
            price = %price,
            entry = %position.entry_price,
            breached,
            "Blind stop check with broker price"
        );
        breached.then_some((StopKind::Emergency, price))
    }

    /// Build metadata for a position opened outside the bot.
    async fn adopt(&self, market: &dyn MarketData, position: &Position) -> Option<PositionMeta> {
        let bars = match market
            .historical_bars(&position.symbol, Timeframe::Hour, self.bar_lookback)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "Cannot adopt position, bars unavailable");
                return None;
            }
        };
        let atr = indicators::atr(&bars, ATR_PERIOD).filter(|a| *a > Decimal::ZERO);
        match atr {
            Some(atr) => {
                info!(symbol = %position.symbol, atr = %atr.round_dp(6), "Adopted untracked position");
                Some(PositionMeta::new(atr, position.entry_price, None))
            }
            None => {
                warn!(symbol = %position.symbol, bars = bars.len(), "Cannot adopt position, ATR unavailable");
                None
            }
        }
    }

    /// Flatten a position and record the trade. `None` when the broker refused.
    #[allow(clippy::too_many_arguments)]
    async fn close(
        &self,
        broker: &dyn Brokerage,
        state: &mut BotState,
        history: &TradeHistory,
        position: &Position,
        kind: StopKind,
        trigger_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        let fill = match broker.close_position(&position.symbol).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %position.symbol, reason = %kind, error = %e, "Failed to close position");
                return None;
            }
        };

        let exit_price = fill.filled_avg_price.unwrap_or(trigger_price);
        let qty = fill.filled_qty.unwrap_or(position.qty);
        let record = TradeRecord::new(now, &position.symbol, position.entry_price, exit_price, qty, kind.reason());
        warn!(
            symbol = %position.symbol,
            reason = %kind,
            exit = %exit_price,
            pnl = %record.pnl,
            pnl_pct = %record.pnl_pct,
            "Position closed"
        );

        if let Err(e) = history.append(&record) {
            error!(error = %e, "Failed to append trade record");
        }
        state.positions.remove(&position.symbol);
        state.start_cooldown(&position.symbol, now);
        Some(record)
    }
}

/// Drop metadata of symbols the broker no longer holds and start their cooldown.
fn reconcile(state: &mut BotState, positions: &[Position], now: DateTime<Utc>) -> Vec<String> {
    let held: HashSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
    let gone: Vec<String> = state
        .positions
        .keys()
        .filter(|s| !held.contains(s.as_str()))
        .cloned()
        .collect();

    for symbol in &gone {
        state.positions.remove(symbol);
        state.start_cooldown(symbol, now);
        info!(%symbol, "Position closed outside the bot, metadata removed");
    }
    gone
}
