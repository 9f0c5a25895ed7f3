//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Market regime classification from the benchmark trend
//! - Technical indicators and regime-aware scoring
//! - Candidate scanning and ranking
//! - The trading cycle that ties scoring, risk and execution together

mod cycle;
pub mod indicators;
mod regime;
mod scanner;
mod technical;

pub use cycle::{fuse_scores, is_lock_contention, CycleOrchestrator, CycleOutcome};
pub use regime::{classify_closes, MarketRegime, RegimeClassifier};
pub use scanner::{rank, Candidate, CandidateScanner};
pub use technical::{IndicatorSnapshot, TechVerdict, TechnicalScore, TechnicalScorer};
