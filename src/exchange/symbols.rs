//! Symbol translation between the broker, market data and news providers.
//!
//! Default rule: the base asset is the part before `/` (`BTC/USD` -> `BTC`);
//! slash-less broker symbols (`BTCUSD`) are split on a known quote suffix.
//! News search terms fall back to the base asset unless listed in
//! [`NEWS_NAME_OVERRIDES`].

use std::collections::HashMap;

/// Quote currencies recognised when splitting slash-less symbols, longest first.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "USD", "BTC"];

/// Base assets that search better by their full name.
pub const NEWS_NAME_OVERRIDES: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("SOL", "Solana"),
    ("DOGE", "Dogecoin"),
    ("AVAX", "Avalanche"),
    ("LINK", "Chainlink"),
    ("DOT", "Polkadot"),
    ("LTC", "Litecoin"),
    ("BCH", "Bitcoin Cash"),
    ("SHIB", "Shiba Inu"),
    ("UNI", "Uniswap"),
    ("XTZ", "Tezos"),
];

/// Lookup table for provider-specific symbol formats.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    news_names: HashMap<String, String>,
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::with_overrides(NEWS_NAME_OVERRIDES.iter().copied())
    }

    /// Build a map with a custom override list.
    pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            news_names: overrides
                .into_iter()
                .map(|(base, name)| (base.to_uppercase(), name.to_string()))
                .collect(),
        }
    }

    /// Normalize any broker symbol to `BASE/QUOTE`.
    pub fn to_pair(symbol: &str) -> String {
        let upper = symbol.trim().to_uppercase();
        if upper.contains('/') {
            return upper;
        }
        for quote in KNOWN_QUOTES {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return format!("{}/{}", base, quote);
                }
            }
        }
        upper
    }

    /// Base asset of a symbol in either format.
    pub fn base_asset(symbol: &str) -> String {
        let pair = Self::to_pair(symbol);
        match pair.split_once('/') {
            Some((base, _)) => base.to_string(),
            None => pair,
        }
    }

    /// Quote currency of a symbol, if it has one.
    pub fn quote_asset(symbol: &str) -> Option<String> {
        Self::to_pair(symbol)
            .split_once('/')
            .map(|(_, quote)| quote.to_string())
    }

    /// Currency code for news APIs that filter by ticker.
    pub fn news_currency(&self, symbol: &str) -> String {
        Self::base_asset(symbol)
    }

    /// Free-text search term for news APIs that search by keyword.
    pub fn news_search_term(&self, symbol: &str) -> String {
        let base = Self::base_asset(symbol);
        self.news_names.get(&base).cloned().unwrap_or(base)
    }
}
