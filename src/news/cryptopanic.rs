//! CryptoPanic posts API.

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

const BASE_URL: &str = "https://cryptopanic.com";

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    results: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl From<Post> for NewsArticle {
    fn from(p: Post) -> Self {
        Self {
            title: p.title.trim().to_string(),
            snippet: p.description.filter(|d| !d.trim().is_empty()),
            url: p.url,
            source: p.domain,
            published_at: p.published_at,
        }
    }
}

/// Public news posts filtered by currency code.
pub struct CryptoPanicProvider {
    http: Client,
    api_key: String,
    base_url: String,
    symbols: SymbolMap,
}

impl CryptoPanicProvider {
    pub fn new(api_key: &str, symbols: SymbolMap) -> Result<Self> {
        Self::with_base_url(api_key, symbols, BASE_URL)
    }

    pub fn with_base_url(api_key: &str, symbols: SymbolMap, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            symbols,
        })
    }
}

#[async_trait]
impl NewsProvider for CryptoPanicProvider {
    fn name(&self) -> &str {
        "cryptopanic"
    }

    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str) -> Result<Vec<NewsArticle>> {
        let currency = self.symbols.news_currency(symbol);
        let url = format!("{}/api/v1/posts/", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("auth_token", self.api_key.as_str()),
                ("currencies", currency.as_str()),
                ("kind", "news"),
                ("public", "true"),
            ])
            .send()
            .await
            .context("Failed to query CryptoPanic")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            anyhow::bail!("CryptoPanic returned status {}: {}", status, excerpt);
        }

        let posts: PostsResponse = response
            .json()
            .await
            .context("Failed to parse CryptoPanic response")?;
        Ok(posts.results.into_iter().map(NewsArticle::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_maps_posts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/"))
            .and(query_param("currencies", "SOL"))
            .and(query_param("auth_token", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "results": [
                    {"title": " Solana upgrade ships ", "url": "https://x/1", "domain": "coindesk.com",
                     "published_at": "2024-05-01T12:00:00Z"},
                    {"title": "SOL ETF filed", "domain": "theblock.co"}
                ]
            })))
            .mount(&server)
            .await;

        let provider =
            CryptoPanicProvider::with_base_url(" token\n", SymbolMap::new(), &server.uri()).unwrap();
        let articles = provider.fetch("SOL/USD").await.unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Solana upgrade ships");
        assert_eq!(articles[0].source.as_deref(), Some("coindesk.com"));
        assert!(articles[0].published_at.is_some());
        assert!(articles[1].url.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let provider =
            CryptoPanicProvider::with_base_url("token", SymbolMap::new(), &server.uri()).unwrap();
        assert!(provider.fetch("BTC/USD").await.is_err());
    }
}
