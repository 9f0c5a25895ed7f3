//! Type definitions for Alpaca API responses and the normalized market view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ==================== Trading API ====================

/// Account summary from `/v2/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub buying_power: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
}

/// Open position as reported by `/v2/positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_price: Decimal,
    /// Unrealized P&L as a fraction (0.05 = 5%)
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_plpc: Decimal,
}

/// An open holding, normalized to `BASE/QUOTE` symbols and percent P&L.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    /// Unrealized P&L in percent (5 = 5%)
    pub unrealized_pl_pct: Decimal,
}

/// Tradable asset from `/v2/assets`.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub symbol: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tradable: bool,
}

/// Market order by notional amount.
#[derive(Debug, Clone, Serialize)]
pub struct NotionalOrder {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub notional: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Gtc,
}

/// Order response from the trading API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    pub status: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_avg_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_qty: Option<Decimal>,
}

/// Result of an order as seen by the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub status: String,
    pub filled_avg_price: Option<Decimal>,
    pub filled_qty: Option<Decimal>,
}

impl From<OrderResponse> for OrderFill {
    fn from(r: OrderResponse) -> Self {
        Self {
            order_id: r.id,
            symbol: r.symbol,
            status: r.status,
            filled_avg_price: r.filled_avg_price,
            filled_qty: r.filled_qty,
        }
    }
}

// ==================== Market Data API ====================

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
}

/// Response of `/v1beta3/crypto/us/bars`.
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: HashMap<String, Vec<Bar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "p")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    #[serde(default)]
    pub daily_bar: Option<Bar>,
    #[serde(default)]
    pub latest_trade: Option<RawTrade>,
}

/// Response of `/v1beta3/crypto/us/snapshots`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotsResponse {
    #[serde(default)]
    pub snapshots: HashMap<String, RawSnapshot>,
}

/// Latest session view of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub symbol: String,
    /// Session open
    pub open: Decimal,
    /// Latest traded price (falls back to the session close)
    pub price: Decimal,
    /// Session volume in base units
    pub volume: Decimal,
}

impl Snapshot {
    /// Convert a raw snapshot; `None` when it carries no session bar.
    pub fn from_raw(symbol: &str, raw: RawSnapshot) -> Option<Self> {
        let bar = raw.daily_bar?;
        let price = raw.latest_trade.map(|t| t.price).unwrap_or(bar.close);
        Some(Self {
            symbol: symbol.to_string(),
            open: bar.open,
            price,
            volume: bar.volume,
        })
    }

    /// Session volume in quote currency.
    pub fn quote_volume(&self) -> Decimal {
        self.volume * self.price
    }
}

/// Bar granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Hour,
    Day,
}

impl Timeframe {
    /// Alpaca query value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Hour => "1Hour",
            Timeframe::Day => "1Day",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            Timeframe::Hour => chrono::Duration::hours(1),
            Timeframe::Day => chrono::Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
