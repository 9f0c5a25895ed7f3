//! Brokerage and market data integrations.
//!
//! ## Alpaca
//! REST connectivity for:
//! - Account equity and open positions
//! - Tradable crypto assets and market orders by notional
//! - Crypto snapshots and historical bars
//!
//! ## Mock
//! An in-memory exchange implementing the same traits, for tests.

mod client;
pub mod mock;
pub mod symbols;
mod traits;
mod types;

pub use client::AlpacaClient;
pub use mock::MockExchange;
pub use symbols::SymbolMap;
pub use traits::{Brokerage, MarketData};
pub use types::*;
