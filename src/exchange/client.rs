//! Alpaca REST API client (trading + crypto market data).

use crate::config::AlpacaConfig;
use crate::exchange::symbols::SymbolMap;
use crate::exchange::traits::{Brokerage, MarketData};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const TRADING_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";

/// Alpaca API client for account, orders and crypto market data.
pub struct AlpacaClient {
    http: Client,
    api_key: String,
    secret_key: String,
    trading_base_url: String,
    data_base_url: String,
}

impl AlpacaClient {
    /// Create a new Alpaca client from configuration.
    pub fn new(config: &AlpacaConfig) -> Result<Self> {
        let trading_base_url = if config.paper {
            PAPER_TRADING_URL
        } else {
            TRADING_BASE_URL
        };
        Self::with_base_urls(config, trading_base_url, &config.data_url)
    }

    /// Create a client against custom endpoints.
    pub fn with_base_urls(config: &AlpacaConfig, trading_url: &str, data_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            trading_base_url: trading_url.trim_end_matches('/').to_string(),
            data_base_url: data_url.trim_end_matches('/').to_string(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Turn non-2xx responses into errors carrying the body.
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alpaca {} failed with status {}: {}", what, status, body);
        }
        Ok(response)
    }

    // ==================== Market Data ====================

    /// Fetch snapshots for one batch of symbols.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn get_snapshots(&self, symbols: &[String]) -> Result<SnapshotsResponse> {
        let url = format!(
            "{}/v1beta3/crypto/us/snapshots?symbols={}",
            self.data_base_url,
            urlencoding::encode(&symbols.join(","))
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch snapshots")?;

        Self::check(response, "snapshots")
            .await?
            .json()
            .await
            .context("Failed to parse snapshots response")
    }

    /// Fetch bars for one symbol starting `limit` periods back.
    #[instrument(skip(self))]
    pub async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<BarsResponse> {
        // A little slack so gaps in thin markets still yield `limit` bars.
        let start = Utc::now() - timeframe.duration() * (limit as i32 + 5);
        let url = format!(
            "{}/v1beta3/crypto/us/bars?symbols={}&timeframe={}&start={}&limit=10000",
            self.data_base_url,
            urlencoding::encode(symbol),
            timeframe.as_str(),
            urlencoding::encode(&start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch bars")?;

        Self::check(response, "bars")
            .await?
            .json()
            .await
            .context("Failed to parse bars response")
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    #[instrument(skip(self))]
    async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.trading_base_url);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch account")?;

        Self::check(response, "account")
            .await?
            .json()
            .await
            .context("Failed to parse account response")
    }

    #[instrument(skip(self))]
    async fn list_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/v2/positions", self.trading_base_url);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch positions")?;

        let raw: Vec<RawPosition> = Self::check(response, "positions")
            .await?
            .json()
            .await
            .context("Failed to parse positions response")?;

        Ok(raw
            .into_iter()
            .map(|p| Position {
                symbol: SymbolMap::to_pair(&p.symbol),
                qty: p.qty,
                entry_price: p.avg_entry_price,
                current_price: p.current_price,
                unrealized_pl_pct: p.unrealized_plpc * Decimal::ONE_HUNDRED,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_tradable_assets(&self) -> Result<Vec<Asset>> {
        let url = format!(
            "{}/v2/assets?asset_class=crypto&status=active",
            self.trading_base_url
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch assets")?;

        let assets: Vec<Asset> = Self::check(response, "assets")
            .await?
            .json()
            .await
            .context("Failed to parse assets response")?;

        Ok(assets.into_iter().filter(|a| a.tradable).collect())
    }

    #[instrument(skip(self))]
    async fn submit_market_buy(&self, symbol: &str, notional: Decimal) -> Result<OrderFill> {
        let order = NotionalOrder {
            symbol: symbol.to_string(),
            notional: notional.round_dp(2),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
        };
        debug!("Placing order: {:?}", order);

        let url = format!("{}/v2/orders", self.trading_base_url);
        let response = self
            .authed(self.http.post(&url))
            .json(&order)
            .send()
            .await
            .context("Failed to place order")?;

        let order: OrderResponse = Self::check(response, "order")
            .await?
            .json()
            .await
            .context("Failed to parse order response")?;
        Ok(order.into())
    }

    #[instrument(skip(self))]
    async fn close_position(&self, symbol: &str) -> Result<OrderFill> {
        // The positions endpoint takes the slash-less form.
        let url = format!(
            "{}/v2/positions/{}",
            self.trading_base_url,
            urlencoding::encode(&symbol.replace('/', ""))
        );
        let response = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .context("Failed to close position")?;

        let order: OrderResponse = Self::check(response, "close position")
            .await?
            .json()
            .await
            .context("Failed to parse close response")?;
        Ok(order.into())
    }
}

#[async_trait]
impl MarketData for AlpacaClient {
    async fn latest_snapshots(&self, symbols: &[String]) -> Result<HashMap<String, Snapshot>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let response = self.get_snapshots(symbols).await?;
        Ok(response
            .snapshots
            .into_iter()
            .filter_map(|(symbol, raw)| Snapshot::from_raw(&symbol, raw).map(|s| (symbol, s)))
            .collect())
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let mut response = self.get_bars(symbol, timeframe, limit).await?;
        let mut bars = response.bars.remove(symbol).unwrap_or_default();
        bars.sort_by_key(|b| b.timestamp);
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> AlpacaConfig {
        AlpacaConfig {
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            paper: true,
            data_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_positions_are_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .and(header("APCA-API-KEY-ID", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "symbol": "SOLUSD",
                "qty": "2",
                "avg_entry_price": "100",
                "current_price": "105",
                "unrealized_plpc": "0.05"
            }])))
            .mount(&server)
            .await;

        let client =
            AlpacaClient::with_base_urls(&test_config(), &server.uri(), &server.uri()).unwrap();
        let positions = client.list_positions().await.unwrap();

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "SOL/USD");
        assert_eq!(positions[0].unrealized_pl_pct, dec!(5));
    }

    #[tokio::test]
    async fn test_snapshots_skip_symbols_without_bars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta3/crypto/us/snapshots"))
            .and(query_param("symbols", "BTC/USD,XYZ/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "BTC/USD": {
                        "dailyBar": {"t": "2024-05-01T00:00:00Z", "o": 60000, "h": 61000, "l": 59000, "c": 60500, "v": 12.5}
                    },
                    "XYZ/USD": {}
                }
            })))
            .mount(&server)
            .await;

        let client =
            AlpacaClient::with_base_urls(&test_config(), &server.uri(), &server.uri()).unwrap();
        let snaps = client
            .latest_snapshots(&["BTC/USD".to_string(), "XYZ/USD".to_string()])
            .await
            .unwrap();

        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps["BTC/USD"].price, dec!(60500));
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/account"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client =
            AlpacaClient::with_base_urls(&test_config(), &server.uri(), &server.uri()).unwrap();
        let err = client.get_account().await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
