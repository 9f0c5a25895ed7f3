//! News article and verdict types.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Headline used when no provider returned anything.
pub const NO_NEWS_HEADLINE: &str = "No recent news found";

/// One news item from any provider.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    pub snippet: Option<String>,
    pub url: Option<String>,
    /// Publisher name or domain
    pub source: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsArticle {
    pub fn headline(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            snippet: None,
            url: None,
            source: None,
            published_at: None,
        }
    }

    /// Placeholder standing in for an empty news feed.
    pub fn placeholder() -> Self {
        Self::headline(NO_NEWS_HEADLINE)
    }
}

/// Outcome of the news stage for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsVerdict {
    /// 0..=100, 50 is neutral
    pub score: u8,
    pub reason: String,
    /// Served from the score cache without an LLM call
    pub cached: bool,
}

impl NewsVerdict {
    pub const NEUTRAL_SCORE: u8 = 50;

    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: Self::NEUTRAL_SCORE,
            reason: reason.into(),
            cached: false,
        }
    }
}

/// Lowercase hex SHA-256 of the headlines joined by newlines.
pub fn fingerprint(articles: &[NewsArticle]) -> String {
    let joined = articles
        .iter()
        .map(|a| a.title.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    hex::encode(Sha256::digest(joined.as_bytes()))
}
