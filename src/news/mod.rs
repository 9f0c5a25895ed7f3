//! News retrieval and LLM sentiment scoring.
//!
//! ## Providers
//! - CryptoPanic posts (primary, needs an API key)
//! - Google News RSS (fallback, keyless)
//!
//! Each provider sits behind its own circuit breaker. The scorer fingerprints
//! the headlines and reuses a cached verdict while the news is unchanged.

mod cryptopanic;
mod google;
mod llm;
mod providers;
mod scorer;
mod types;

pub use cryptopanic::CryptoPanicProvider;
pub use google::{parse_feed, GoogleNewsProvider};
pub use llm::{build_prompt, parse_verdict, LlmClient, OpenAiClient, SYSTEM_PROMPT};
#[cfg(test)]
pub use llm::MockLlmClient;
pub use providers::{BreakerState, CircuitBreaker, NewsAggregator, NewsProvider};
pub use scorer::NewsScorer;
pub use types::{fingerprint, NewsArticle, NewsVerdict, NO_NEWS_HEADLINE};
