//! # Vibe Trader
//!
//! A regime-aware crypto trading bot for Alpaca. Each cycle manages open
//! positions with hard, breakeven and ATR trailing stops, then looks for one
//! new entry by blending a technical score with an LLM read of recent news.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Alpaca REST client, mock exchange and symbol mapping
//! - `news`: News providers, circuit breakers and LLM sentiment scoring
//! - `strategy`: Regime, indicators, technical scoring, scanning and the trading cycle
//! - `risk`: Stop computation and position management
//! - `persistence`: JSON state file, cycle lock and trade history
//! - `logging`: Tracing subscriber setup
//! - `shutdown`: Signal handling for the watch loop
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod logging;
pub mod news;
pub mod persistence;
pub mod risk;
pub mod shutdown;
pub mod strategy;
pub mod utils;

pub use config::Config;
