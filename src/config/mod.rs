//! Configuration management for the trading bot.
//!
//! Loads settings from an optional `config.toml`, `VIBE__*` environment variables
//! and the conventional credential variables (`ALPACA_API_KEY`, ...).

use crate::strategy::MarketRegime;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup configuration problems. No cycle may run while any of these hold.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("bear-market `{0}` is looser than the bull-market value")]
    LooserInBear(&'static str),
}

/// A value that differs by market regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ByRegime<T> {
    pub bull: T,
    pub neutral: T,
    pub bear: T,
}

impl<T: Copy> ByRegime<T> {
    pub const fn new(bull: T, neutral: T, bear: T) -> Self {
        Self {
            bull,
            neutral,
            bear,
        }
    }

    /// Pick the value for the given regime.
    pub fn get(&self, regime: MarketRegime) -> T {
        match regime {
            MarketRegime::Bull => self.bull,
            MarketRegime::Neutral => self.neutral,
            MarketRegime::Bear => self.bear,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Alpaca API credentials and endpoints
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    /// News providers
    #[serde(default)]
    pub news: NewsConfig,
    /// LLM endpoint and evaluation budget
    #[serde(default)]
    pub llm: LlmConfig,
    /// Candidate universe and regime benchmark
    #[serde(default)]
    pub market: MarketConfig,
    /// Technical scoring and fusion
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Stop-loss and cooldown parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Position sizing
    #[serde(default)]
    pub capital: CapitalConfig,
    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Use the paper trading endpoint
    #[serde(default = "default_true")]
    pub paper: bool,
    #[serde(default = "default_data_url")]
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// CryptoPanic token; the provider is skipped when empty
    #[serde(default)]
    pub cryptopanic_api_key: String,
    /// Fewer articles than this from a provider triggers the next one
    #[serde(default = "default_min_articles")]
    pub min_articles: usize,
    /// Articles passed to the LLM
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    /// Fixed wait before every news or LLM request
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Consecutive failures that open a provider's breaker
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_minutes")]
    pub breaker_cooldown_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Candidates allowed into the news stage per cycle
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations_per_cycle: usize,
    /// How long a cached verdict stays reusable
    #[serde(default = "default_memory_hours")]
    pub memory_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Benchmark asset for regime classification
    #[serde(default = "default_benchmark")]
    pub benchmark_symbol: String,
    #[serde(default = "default_regime_sma_period")]
    pub regime_sma_period: usize,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    /// Base assets never traded (stablecoins, wrapped assets)
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    /// Symbols per snapshot request
    #[serde(default = "default_snapshot_batch")]
    pub snapshot_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Liquidity floor in quote currency (24h)
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: Decimal,
    /// Volume that counts as confirmation
    #[serde(default = "default_confirm_volume_usd")]
    pub confirm_volume_usd: Decimal,
    /// Hourly bars required for a technical score
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
    #[serde(default = "default_bar_lookback")]
    pub bar_lookback: usize,
    /// Candidates below this technical score never reach the news stage
    #[serde(default = "default_technical_floor")]
    pub technical_floor: Decimal,
    #[serde(default = "default_weight_ai")]
    pub weight_ai: Decimal,
    #[serde(default = "default_weight_tech")]
    pub weight_tech: Decimal,
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: ByRegime<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction below entry for the initial stop (0.05 = 5%)
    #[serde(default = "default_hard_stop")]
    pub hard_stop_fraction: ByRegime<Decimal>,
    /// Unrealized profit percent that makes a position risk-free
    #[serde(default = "default_breakeven_activation")]
    pub breakeven_activation_pct: ByRegime<Decimal>,
    /// Trailing distance in entry ATRs
    #[serde(default = "default_trail_atr_multiplier")]
    pub trail_atr_multiplier: ByRegime<Decimal>,
    /// Breakeven stop sits this fraction above entry
    #[serde(default = "default_breakeven_buffer")]
    pub breakeven_buffer: Decimal,
    /// Drop from entry that flattens a position when no market data is available
    #[serde(default = "default_emergency_stop")]
    pub emergency_stop_fraction: Decimal,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: ByRegime<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Fraction of equity per new position
    #[serde(default = "default_position_size")]
    pub position_size_fraction: ByRegime<Decimal>,
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: Decimal,
    /// Skip the new-entry search entirely in a bear market
    #[serde(default)]
    pub halt_entries_in_bear: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_trade_history")]
    pub trade_history: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_min_articles() -> usize {
    3
}

fn default_max_articles() -> usize {
    5
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_breaker_failure_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_minutes() -> i64 {
    30
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_max_evaluations() -> usize {
    3
}

fn default_memory_hours() -> i64 {
    4
}

fn default_benchmark() -> String {
    "BTC/USD".to_string()
}

fn default_regime_sma_period() -> usize {
    50
}

fn default_quote_currency() -> String {
    "USD".to_string()
}

fn default_denylist() -> Vec<String> {
    ["USDT", "USDC", "DAI", "BUSD", "TUSD", "PYUSD", "USDG", "WBTC", "PAXG"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_snapshot_batch() -> usize {
    50
}

fn default_min_volume_usd() -> Decimal {
    Decimal::new(500_000, 0) // $500k / 24h
}

fn default_confirm_volume_usd() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_min_bars() -> usize {
    30
}

fn default_bar_lookback() -> usize {
    100
}

fn default_technical_floor() -> Decimal {
    Decimal::new(60, 0)
}

fn default_weight_ai() -> Decimal {
    Decimal::new(4, 1) // 0.4
}

fn default_weight_tech() -> Decimal {
    Decimal::new(6, 1) // 0.6
}

fn default_entry_threshold() -> ByRegime<Decimal> {
    ByRegime::new(Decimal::new(75, 0), Decimal::new(75, 0), Decimal::new(80, 0))
}

fn default_hard_stop() -> ByRegime<Decimal> {
    ByRegime::new(Decimal::new(5, 2), Decimal::new(4, 2), Decimal::new(3, 2))
}

fn default_breakeven_activation() -> ByRegime<Decimal> {
    ByRegime::new(Decimal::new(30, 1), Decimal::new(25, 1), Decimal::new(15, 1))
}

fn default_trail_atr_multiplier() -> ByRegime<Decimal> {
    ByRegime::new(Decimal::new(25, 1), Decimal::new(20, 1), Decimal::new(15, 1))
}

fn default_breakeven_buffer() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

fn default_emergency_stop() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_cooldown_hours() -> ByRegime<i64> {
    ByRegime::new(4, 6, 12)
}

fn default_position_size() -> ByRegime<Decimal> {
    ByRegime::new(Decimal::new(10, 2), Decimal::new(8, 2), Decimal::new(5, 2))
}

fn default_min_order_notional() -> Decimal {
    Decimal::new(10, 0)
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/state.json")
}

fn default_trade_history() -> PathBuf {
    PathBuf::from("data/trade_history.jsonl")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file() -> String {
    "bot.log".to_string()
}

/// Read an environment variable, trimming stray whitespace from `.env` files.
fn env_credential(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("VIBE"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.apply_credential_env();
        Ok(config)
    }

    /// Fill credentials from their conventional variable names when not set otherwise.
    fn apply_credential_env(&mut self) {
        let slots: [(&mut String, &str); 4] = [
            (&mut self.alpaca.api_key, "ALPACA_API_KEY"),
            (&mut self.alpaca.secret_key, "ALPACA_SECRET_KEY"),
            (&mut self.news.cryptopanic_api_key, "CRYPTOPANIC_API_KEY"),
            (&mut self.llm.api_key, "OPENAI_API_KEY"),
        ];
        for (slot, var) in slots {
            if slot.trim().is_empty() {
                if let Some(value) = env_credential(var) {
                    *slot = value;
                }
            } else {
                *slot = slot.trim().to_string();
            }
        }
    }

    /// Require trading and LLM credentials.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.alpaca.api_key.is_empty() {
            return Err(ConfigError::MissingCredential("ALPACA_API_KEY"));
        }
        if self.alpaca.secret_key.is_empty() {
            return Err(ConfigError::MissingCredential("ALPACA_SECRET_KEY"));
        }
        if self.llm.api_key.is_empty() {
            return Err(ConfigError::MissingCredential("OPENAI_API_KEY"));
        }
        Ok(())
    }

    /// Validate parameter ranges and that bear-market settings are never looser.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        if s.weight_ai < Decimal::ZERO
            || s.weight_tech < Decimal::ZERO
            || s.weight_ai + s.weight_tech != Decimal::ONE
        {
            return Err(ConfigError::InvalidParameter {
                name: "scoring.weight_ai/weight_tech",
                reason: format!(
                    "weights must be non-negative and sum to 1 (got {} + {})",
                    s.weight_ai, s.weight_tech
                ),
            });
        }
        if s.min_bars < 30 {
            return Err(ConfigError::InvalidParameter {
                name: "scoring.min_bars",
                reason: "at least 30 bars are needed for the indicators".to_string(),
            });
        }
        if s.bar_lookback < s.min_bars {
            return Err(ConfigError::InvalidParameter {
                name: "scoring.bar_lookback",
                reason: format!("must be >= min_bars ({})", s.min_bars),
            });
        }
        if self.market.regime_sma_period == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "market.regime_sma_period",
                reason: "must be positive".to_string(),
            });
        }
        if self.market.snapshot_batch_size == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "market.snapshot_batch_size",
                reason: "must be positive".to_string(),
            });
        }

        for (name, by) in [
            ("risk.hard_stop_fraction", &self.risk.hard_stop_fraction),
            ("capital.position_size_fraction", &self.capital.position_size_fraction),
        ] {
            for v in [by.bull, by.neutral, by.bear] {
                if v <= Decimal::ZERO || v >= Decimal::ONE {
                    return Err(ConfigError::InvalidParameter {
                        name,
                        reason: format!("{} is outside (0, 1)", v),
                    });
                }
            }
        }
        if self.risk.emergency_stop_fraction <= Decimal::ZERO
            || self.risk.emergency_stop_fraction >= Decimal::ONE
        {
            return Err(ConfigError::InvalidParameter {
                name: "risk.emergency_stop_fraction",
                reason: "must be within (0, 1)".to_string(),
            });
        }

        let t = &s.entry_threshold;
        if t.bear < t.bull {
            return Err(ConfigError::LooserInBear("scoring.entry_threshold"));
        }
        let size = &self.capital.position_size_fraction;
        if size.bear > size.bull {
            return Err(ConfigError::LooserInBear("capital.position_size_fraction"));
        }
        let hard = &self.risk.hard_stop_fraction;
        if hard.bear > hard.bull {
            return Err(ConfigError::LooserInBear("risk.hard_stop_fraction"));
        }
        let trail = &self.risk.trail_atr_multiplier;
        if trail.bear > trail.bull {
            return Err(ConfigError::LooserInBear("risk.trail_atr_multiplier"));
        }
        let cooldown = &self.risk.cooldown_hours;
        if cooldown.bear < cooldown.bull {
            return Err(ConfigError::LooserInBear("risk.cooldown_hours"));
        }

        Ok(())
    }

    /// Cooldown window applied to recently closed symbols.
    pub fn cooldown_window(&self, regime: MarketRegime) -> chrono::Duration {
        chrono::Duration::hours(self.risk.cooldown_hours.get(regime))
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            paper: true,
            data_url: default_data_url(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            cryptopanic_api_key: String::new(),
            min_articles: default_min_articles(),
            max_articles: default_max_articles(),
            request_delay_ms: default_request_delay_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_minutes: default_breaker_cooldown_minutes(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_evaluations_per_cycle: default_max_evaluations(),
            memory_hours: default_memory_hours(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            benchmark_symbol: default_benchmark(),
            regime_sma_period: default_regime_sma_period(),
            quote_currency: default_quote_currency(),
            denylist: default_denylist(),
            snapshot_batch_size: default_snapshot_batch(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_volume_usd: default_min_volume_usd(),
            confirm_volume_usd: default_confirm_volume_usd(),
            min_bars: default_min_bars(),
            bar_lookback: default_bar_lookback(),
            technical_floor: default_technical_floor(),
            weight_ai: default_weight_ai(),
            weight_tech: default_weight_tech(),
            entry_threshold: default_entry_threshold(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            hard_stop_fraction: default_hard_stop(),
            breakeven_activation_pct: default_breakeven_activation(),
            trail_atr_multiplier: default_trail_atr_multiplier(),
            breakeven_buffer: default_breakeven_buffer(),
            emergency_stop_fraction: default_emergency_stop(),
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            position_size_fraction: default_position_size(),
            min_order_notional: default_min_order_notional(),
            halt_entries_in_bear: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            trade_history: default_trade_history(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let mut config = Config::default();
        assert_eq!(
            config.validate_credentials(),
            Err(ConfigError::MissingCredential("ALPACA_API_KEY"))
        );

        config.alpaca.api_key = "key".to_string();
        config.alpaca.secret_key = "secret".to_string();
        assert_eq!(
            config.validate_credentials(),
            Err(ConfigError::MissingCredential("OPENAI_API_KEY"))
        );

        config.llm.api_key = "sk-test".to_string();
        assert!(config.validate_credentials().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.scoring.weight_ai = dec!(0.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_bear_threshold_cannot_be_looser() {
        let mut config = Config::default();
        config.scoring.entry_threshold.bear = dec!(70);
        assert_eq!(
            config.validate(),
            Err(ConfigError::LooserInBear("scoring.entry_threshold"))
        );

        let mut config = Config::default();
        config.capital.position_size_fraction.bear = dec!(0.2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::LooserInBear("capital.position_size_fraction"))
        );
    }

    #[test]
    fn test_cooldown_window_by_regime() {
        let config = Config::default();
        assert_eq!(
            config.cooldown_window(MarketRegime::Bear),
            chrono::Duration::hours(12)
        );
        assert_eq!(
            config.cooldown_window(MarketRegime::Bull),
            chrono::Duration::hours(4)
        );
    }
}
