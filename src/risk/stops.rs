//! Stop-loss levels for long positions.
//!
//! Each position runs a two-state machine:
//! - `HardStop`: a fixed stop below entry
//! - `ProfitLock`: the best of breakeven, the hard stop and an ATR trail
//!   below the high watermark
//!
//! The transition happens once the unrealized profit reaches the regime's
//! activation threshold and never reverses.

use crate::config::RiskConfig;
use crate::strategy::MarketRegime;
use rust_decimal::Decimal;
use std::fmt;

/// Regime-resolved stop parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopParams {
    pub hard_stop_fraction: Decimal,
    pub breakeven_activation_pct: Decimal,
    pub trail_atr_multiplier: Decimal,
    pub breakeven_buffer: Decimal,
}

impl StopParams {
    pub fn for_regime(risk: &RiskConfig, regime: MarketRegime) -> Self {
        Self {
            hard_stop_fraction: risk.hard_stop_fraction.get(regime),
            breakeven_activation_pct: risk.breakeven_activation_pct.get(regime),
            trail_atr_multiplier: risk.trail_atr_multiplier.get(regime),
            breakeven_buffer: risk.breakeven_buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    HardStop,
    ProfitLock,
}

impl fmt::Display for StopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopState::HardStop => f.write_str("HARD_STOP"),
            StopState::ProfitLock => f.write_str("PROFIT_LOCK"),
        }
    }
}

/// Which rule produced the effective stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Hard,
    Breakeven,
    Trailing,
    Emergency,
}

impl StopKind {
    /// Close reason recorded in the trade history.
    pub fn reason(&self) -> &'static str {
        match self {
            StopKind::Hard => "hard stop",
            StopKind::Breakeven => "breakeven stop",
            StopKind::Trailing => "trailing stop",
            StopKind::Emergency => "emergency stop",
        }
    }
}

impl fmt::Display for StopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Effective stop for one position this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLevel {
    pub state: StopState,
    pub price: Decimal,
    pub kind: StopKind,
}

impl StopLevel {
    /// A long position exits when the price is at or below the stop.
    pub fn is_hit(&self, price: Decimal) -> bool {
        price <= self.price
    }

    /// Distance from `price` down to the stop, in percent of price.
    pub fn distance_pct(&self, price: Decimal) -> Decimal {
        crate::utils::pct_change(price, self.price).abs()
    }
}

/// Whether a position with this profit should be (or already is) in profit lock.
pub fn reaches_profit_lock(profit_pct: Decimal, already_risk_free: bool, params: &StopParams) -> bool {
    already_risk_free || profit_pct >= params.breakeven_activation_pct
}

/// Compute the stop. `highest` must already include the current price.
pub fn compute_stop(
    entry: Decimal,
    highest: Decimal,
    atr: Decimal,
    risk_free: bool,
    params: &StopParams,
) -> StopLevel {
    let hard = entry * (Decimal::ONE - params.hard_stop_fraction);
    if !risk_free {
        return StopLevel {
            state: StopState::HardStop,
            price: hard,
            kind: StopKind::Hard,
        };
    }

    let breakeven = entry * (Decimal::ONE + params.breakeven_buffer);
    let trailing = highest - params.trail_atr_multiplier * atr;

    let (price, kind) = if trailing > breakeven && trailing > hard {
        (trailing, StopKind::Trailing)
    } else if breakeven >= hard {
        (breakeven, StopKind::Breakeven)
    } else {
        (hard, StopKind::Hard)
    };
    StopLevel {
        state: StopState::ProfitLock,
        price,
        kind,
    }
}

/// Last-resort stop when no fresh price or metadata is available.
pub fn emergency_stop(entry: Decimal, emergency_fraction: Decimal) -> StopLevel {
    StopLevel {
        state: StopState::HardStop,
        price: entry * (Decimal::ONE - emergency_fraction),
        kind: StopKind::Emergency,
    }
}

/// The blind check flattens strictly below the emergency level.
pub fn breaches_emergency(price: Decimal, entry: Decimal, emergency_fraction: Decimal) -> bool {
    price < emergency_stop(entry, emergency_fraction).price
}
