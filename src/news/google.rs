//! Google News RSS search.

use crate::exchange::SymbolMap;
use crate::news::providers::NewsProvider;
use crate::news::types::NewsArticle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

const BASE_URL: &str = "https://news.google.com";
/// The feed rejects obvious non-browser clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_ITEMS: usize = 3;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,
    #[serde(default)]
    source: Option<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    #[serde(rename = "$text", default)]
    name: String,
}

impl From<Item> for NewsArticle {
    fn from(item: Item) -> Self {
        Self {
            title: item.title.trim().to_string(),
            snippet: None,
            url: item.link,
            source: item.source.map(|s| s.name).filter(|s| !s.is_empty()),
            published_at: item
                .pub_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }
}

/// Parse an RSS document into at most `limit` articles.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<NewsArticle>> {
    let rss: Rss = quick_xml::de::from_str(xml).context("Failed to parse RSS feed")?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .take(limit)
        .map(NewsArticle::from)
        .collect())
}

/// Keyword search over the last day of Google News.
pub struct GoogleNewsProvider {
    http: Client,
    base_url: String,
    symbols: SymbolMap,
}

impl GoogleNewsProvider {
    pub fn new(symbols: SymbolMap) -> Result<Self> {
        Self::with_base_url(symbols, BASE_URL)
    }

    pub fn with_base_url(symbols: SymbolMap, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbols,
        })
    }
}

#[async_trait]
impl NewsProvider for GoogleNewsProvider {
    fn name(&self) -> &str {
        "google-news"
    }

    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str) -> Result<Vec<NewsArticle>> {
        let query = format!("{} crypto when:1d", self.symbols.news_search_term(symbol));
        let url = format!("{}/rss/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query.as_str()),
                ("hl", "en-US"),
                ("gl", "US"),
                ("ceid", "US:en"),
            ])
            .send()
            .await
            .context("Failed to query Google News")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Google News returned status {}", status);
        }
        let body = response
            .text()
            .await
            .context("Failed to read Google News response")?;
        parse_feed(&body, MAX_ITEMS)
    }
}
