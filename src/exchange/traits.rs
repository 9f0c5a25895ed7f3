//! Collaborator contracts for the brokerage and market data services.
//!
//! The strategy only talks to these traits, so the Alpaca client and the
//! in-memory mock are interchangeable. Failures are `Err`, never an empty
//! value: callers must read an error as "insufficient data".

use super::types::{Account, Asset, Bar, OrderFill, Position, Snapshot, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Account, positions and order entry.
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Account equity and buying power.
    async fn get_account(&self) -> anyhow::Result<Account>;

    /// All open positions, symbols normalized to `BASE/QUOTE`.
    async fn list_positions(&self) -> anyhow::Result<Vec<Position>>;

    /// Active, tradable crypto assets.
    async fn list_tradable_assets(&self) -> anyhow::Result<Vec<Asset>>;

    /// Submit a market buy for a quote-currency amount.
    async fn submit_market_buy(&self, symbol: &str, notional: Decimal)
        -> anyhow::Result<OrderFill>;

    /// Flatten the whole position in `symbol` at market.
    async fn close_position(&self, symbol: &str) -> anyhow::Result<OrderFill>;
}

/// Snapshots and historical bars.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest snapshot for each symbol; symbols without data are absent from the map.
    async fn latest_snapshots(&self, symbols: &[String])
        -> anyhow::Result<HashMap<String, Snapshot>>;

    /// Up to `limit` most recent bars, oldest first.
    async fn historical_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<Vec<Bar>>;
}
