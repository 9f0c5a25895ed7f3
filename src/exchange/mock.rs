//! In-memory exchange for tests and dry runs.
//!
//! Holds a simulated account, positions, snapshots and bar history. Orders fill
//! instantly at the current snapshot price. Individual endpoints can be made to
//! fail to exercise the degraded paths of the strategy.

use super::traits::{Brokerage, MarketData};
use super::types::*;
use crate::utils::pct_change;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Simulated account state.
#[derive(Debug, Clone)]
pub struct MockTradingState {
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub assets: Vec<Asset>,
    pub snapshots: HashMap<String, Snapshot>,
    pub bars: HashMap<(String, Timeframe), Vec<Bar>>,
    /// Orders in submission order: (symbol, side, notional or qty, fill price)
    pub orders: Vec<(String, OrderSide, Decimal, Decimal)>,
}

impl Default for MockTradingState {
    fn default() -> Self {
        Self {
            cash: dec!(10000),
            positions: HashMap::new(),
            assets: Vec::new(),
            snapshots: HashMap::new(),
            bars: HashMap::new(),
            orders: Vec::new(),
        }
    }
}

/// Endpoints that should fail on the next calls.
#[derive(Debug, Default)]
struct Failures {
    account: bool,
    positions: bool,
    assets: bool,
    orders: bool,
    snapshots: bool,
    bars: HashSet<String>,
}

/// Mock client implementing both collaborator traits.
#[derive(Clone)]
pub struct MockExchange {
    state: Arc<RwLock<MockTradingState>>,
    failures: Arc<RwLock<Failures>>,
    order_id_counter: Arc<AtomicU64>,
}

impl MockExchange {
    /// Create a mock account holding `cash`.
    pub fn new(cash: Decimal) -> Self {
        let state = MockTradingState {
            cash,
            ..MockTradingState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            failures: Arc::new(RwLock::new(Failures::default())),
            order_id_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a tradable asset.
    pub async fn add_asset(&self, symbol: &str) {
        self.state.write().await.assets.push(Asset {
            symbol: symbol.to_string(),
            class: "crypto".to_string(),
            status: "active".to_string(),
            tradable: true,
        });
    }

    /// Set the session snapshot of a symbol.
    pub async fn set_snapshot(&self, symbol: &str, open: Decimal, price: Decimal, volume: Decimal) {
        self.state.write().await.snapshots.insert(
            symbol.to_string(),
            Snapshot {
                symbol: symbol.to_string(),
                open,
                price,
                volume,
            },
        );
    }

    /// Move the price of a symbol, keeping position marks in sync.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        if let Some(snap) = state.snapshots.get_mut(symbol) {
            snap.price = price;
        } else {
            state.snapshots.insert(
                symbol.to_string(),
                Snapshot {
                    symbol: symbol.to_string(),
                    open: price,
                    price,
                    volume: Decimal::ZERO,
                },
            );
        }
        if let Some(pos) = state.positions.get_mut(symbol) {
            pos.current_price = price;
            pos.unrealized_pl_pct = pct_change(pos.entry_price, price);
        }
    }

    /// Drop the snapshot of a symbol so market data reports it as missing.
    pub async fn remove_snapshot(&self, symbol: &str) {
        self.state.write().await.snapshots.remove(symbol);
    }

    /// Replace the bar history of a symbol.
    pub async fn set_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.state
            .write()
            .await
            .bars
            .insert((symbol.to_string(), timeframe), bars);
    }

    /// Inject an existing holding.
    pub async fn open_position(&self, symbol: &str, qty: Decimal, entry_price: Decimal) {
        let mut state = self.state.write().await;
        let current = state
            .snapshots
            .get(symbol)
            .map(|s| s.price)
            .unwrap_or(entry_price);
        state.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                qty,
                entry_price,
                current_price: current,
                unrealized_pl_pct: pct_change(entry_price, current),
            },
        );
    }

    pub async fn fail_snapshots(&self, fail: bool) {
        self.failures.write().await.snapshots = fail;
    }

    pub async fn fail_bars(&self, symbol: &str) {
        self.failures.write().await.bars.insert(symbol.to_string());
    }

    pub async fn fail_orders(&self, fail: bool) {
        self.failures.write().await.orders = fail;
    }

    pub async fn fail_account(&self, fail: bool) {
        self.failures.write().await.account = fail;
    }

    pub async fn fail_positions(&self, fail: bool) {
        self.failures.write().await.positions = fail;
    }

    pub async fn fail_assets(&self, fail: bool) {
        self.failures.write().await.assets = fail;
    }

    /// Get a copy of the current mock state.
    pub async fn get_state(&self) -> MockTradingState {
        self.state.read().await.clone()
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Brokerage for MockExchange {
    async fn get_account(&self) -> Result<Account> {
        if self.failures.read().await.account {
            return Err(anyhow!("mock: account unavailable"));
        }
        let state = self.state.read().await;
        let holdings: Decimal = state
            .positions
            .values()
            .map(|p| p.qty * p.current_price)
            .sum();
        Ok(Account {
            equity: state.cash + holdings,
            buying_power: state.cash,
            cash: state.cash,
        })
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        if self.failures.read().await.positions {
            return Err(anyhow!("mock: positions unavailable"));
        }
        let mut positions: Vec<Position> =
            self.state.read().await.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn list_tradable_assets(&self) -> Result<Vec<Asset>> {
        if self.failures.read().await.assets {
            return Err(anyhow!("mock: assets unavailable"));
        }
        Ok(self.state.read().await.assets.clone())
    }

    async fn submit_market_buy(&self, symbol: &str, notional: Decimal) -> Result<OrderFill> {
        if self.failures.read().await.orders {
            return Err(anyhow!("mock: order rejected"));
        }
        let mut state = self.state.write().await;
        let price = state
            .snapshots
            .get(symbol)
            .map(|s| s.price)
            .ok_or_else(|| anyhow!("mock: no price for {}", symbol))?;
        if notional > state.cash {
            return Err(anyhow!("mock: insufficient buying power"));
        }
        let qty = notional / price;
        state.cash -= notional;
        state.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                qty,
                entry_price: price,
                current_price: price,
                unrealized_pl_pct: Decimal::ZERO,
            },
        );
        state
            .orders
            .push((symbol.to_string(), OrderSide::Buy, notional, price));
        debug!(%symbol, %notional, %price, "Mock buy filled");

        Ok(OrderFill {
            order_id: self.next_order_id(),
            symbol: symbol.to_string(),
            status: "filled".to_string(),
            filled_avg_price: Some(price),
            filled_qty: Some(qty),
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderFill> {
        if self.failures.read().await.orders {
            return Err(anyhow!("mock: order rejected"));
        }
        let mut state = self.state.write().await;
        let position = state
            .positions
            .remove(symbol)
            .ok_or_else(|| anyhow!("mock: no position in {}", symbol))?;
        let price = position.current_price;
        state.cash += position.qty * price;
        state
            .orders
            .push((symbol.to_string(), OrderSide::Sell, position.qty, price));
        debug!(%symbol, qty = %position.qty, %price, "Mock close filled");

        Ok(OrderFill {
            order_id: self.next_order_id(),
            symbol: symbol.to_string(),
            status: "filled".to_string(),
            filled_avg_price: Some(price),
            filled_qty: Some(position.qty),
        })
    }
}

#[async_trait]
impl MarketData for MockExchange {
    async fn latest_snapshots(&self, symbols: &[String]) -> Result<HashMap<String, Snapshot>> {
        if self.failures.read().await.snapshots {
            return Err(anyhow!("mock: snapshots unavailable"));
        }
        let state = self.state.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| state.snapshots.get(s).map(|snap| (s.clone(), snap.clone())))
            .collect())
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        if self.failures.read().await.bars.contains(symbol) {
            return Err(anyhow!("mock: bars unavailable for {}", symbol));
        }
        let state = self.state.read().await;
        let bars = state
            .bars
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buy_and_close_round_trip() {
        let mock = MockExchange::new(dec!(1000));
        mock.set_snapshot("SOL/USD", dec!(100), dec!(100), dec!(50000)).await;

        let fill = mock.submit_market_buy("SOL/USD", dec!(100)).await.unwrap();
        assert_eq!(fill.filled_qty, Some(dec!(1)));
        assert_eq!(mock.get_account().await.unwrap().cash, dec!(900));

        mock.set_price("SOL/USD", dec!(110)).await;
        let positions = mock.list_positions().await.unwrap();
        assert_eq!(positions[0].unrealized_pl_pct, dec!(10));

        let close = mock.close_position("SOL/USD").await.unwrap();
        assert_eq!(close.filled_avg_price, Some(dec!(110)));
        assert_eq!(mock.get_account().await.unwrap().cash, dec!(1010));
        assert!(mock.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_errors_not_empty() {
        let mock = MockExchange::new(dec!(1000));
        mock.fail_snapshots(true).await;
        assert!(mock.latest_snapshots(&["BTC/USD".to_string()]).await.is_err());

        mock.fail_snapshots(false).await;
        let snaps = mock.latest_snapshots(&["BTC/USD".to_string()]).await.unwrap();
        assert!(snaps.is_empty());
    }
}
