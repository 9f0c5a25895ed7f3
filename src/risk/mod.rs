//! Risk management for open positions.
//!
//! - Regime-dependent hard stops
//! - Breakeven and ATR trailing stops once a position is risk-free
//! - Emergency stop when prices or metadata are missing
//! - Reconciliation with the broker's book

mod position_manager;
mod stops;

pub use position_manager::{ManageReport, PositionManager};
pub use stops::{
    breaches_emergency, compute_stop, emergency_stop, reaches_profit_lock, StopKind, StopLevel,
    StopParams, StopState,
};
