//! Shared helpers.

pub mod decimal;

pub use decimal::{clamp_score, pct_change, safe_div, weighted_sum};
