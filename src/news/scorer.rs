//! News sentiment scoring with caching and a per-cycle budget.

use crate::config::Config;
use crate::exchange::SymbolMap;
use crate::news::cryptopanic::CryptoPanicProvider;
use crate::news::google::GoogleNewsProvider;
use crate::news::llm::{build_prompt, parse_verdict, LlmClient, SYSTEM_PROMPT};
use crate::news::providers::{BreakerState, NewsAggregator, NewsProvider};
use crate::news::types::{fingerprint, NewsVerdict};
use crate::persistence::BotState;
use crate::strategy::MarketRegime;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fetches news, consults the cache and asks the LLM when needed.
pub struct NewsScorer {
    aggregator: NewsAggregator,
    llm: Arc<dyn LlmClient>,
    memory: Duration,
    max_evaluations: usize,
    evaluations: usize,
    request_delay: std::time::Duration,
}

impl NewsScorer {
    pub fn new(
        aggregator: NewsAggregator,
        llm: Arc<dyn LlmClient>,
        memory: Duration,
        max_evaluations: usize,
        request_delay: std::time::Duration,
    ) -> Self {
        Self {
            aggregator,
            llm,
            memory,
            max_evaluations,
            evaluations: 0,
            request_delay,
        }
    }

    /// Wire the configured providers (CryptoPanic first when keyed, then Google News).
    pub fn from_config(config: &Config, llm: Arc<dyn LlmClient>) -> anyhow::Result<Self> {
        let symbols = SymbolMap::new();
        let mut providers: Vec<Box<dyn NewsProvider>> = Vec::new();
        if config.news.cryptopanic_api_key.is_empty() {
            info!("CryptoPanic key not set, using Google News only");
        } else {
            providers.push(Box::new(CryptoPanicProvider::new(
                &config.news.cryptopanic_api_key,
                symbols.clone(),
            )?));
        }
        providers.push(Box::new(GoogleNewsProvider::new(symbols)?));

        let request_delay = std::time::Duration::from_millis(config.news.request_delay_ms);
        let aggregator = NewsAggregator::new(
            providers,
            config.news.min_articles,
            config.news.max_articles,
            config.news.breaker_failure_threshold,
            Duration::minutes(config.news.breaker_cooldown_minutes),
            request_delay,
        );
        Ok(Self::new(
            aggregator,
            llm,
            Duration::hours(config.llm.memory_hours),
            config.llm.max_evaluations_per_cycle,
            request_delay,
        ))
    }

    /// Reset the evaluation budget at the start of a cycle.
    pub fn begin_cycle(&mut self) {
        self.evaluations = 0;
    }

    pub fn has_budget(&self) -> bool {
        self.evaluations < self.max_evaluations
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Names of providers whose breaker is currently open.
    pub fn open_breakers(&self, now: DateTime<Utc>) -> Vec<String> {
        self.aggregator
            .breaker_states(now)
            .into_iter()
            .filter(|(_, state)| matches!(state, BreakerState::Open { .. }))
            .map(|(name, _)| name)
            .collect()
    }

    /// Score the news for `symbol`. Consumes one unit of budget.
    ///
    /// Never fails: any error yields a neutral 50, which is not cached.
    pub async fn score(
        &mut self,
        symbol: &str,
        regime: MarketRegime,
        state: &mut BotState,
        now: DateTime<Utc>,
    ) -> NewsVerdict {
        self.evaluations += 1;

        let articles = self.aggregator.gather(symbol, now).await;
        let fp = fingerprint(&articles);

        if let Some(score) = state.cached_score(symbol, &fp, now, self.memory) {
            debug!(%symbol, score, "News score from cache");
            return NewsVerdict {
                score,
                reason: "unchanged news, cached verdict".to_string(),
                cached: true,
            };
        }

        let prompt = build_prompt(symbol, regime, &articles);
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        let reply = match self.llm.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%symbol, error = %e, "LLM call failed, using neutral score");
                return NewsVerdict::neutral("LLM unavailable");
            }
        };

        match parse_verdict(&reply) {
            Some((score, reason)) => {
                state.remember_score(symbol, &fp, score, now);
                info!(%symbol, score, %reason, headlines = articles.len(), "News evaluated");
                NewsVerdict {
                    score,
                    reason,
                    cached: false,
                }
            }
            None => {
                let excerpt: String = reply.chars().take(120).collect();
                warn!(%symbol, reply = %excerpt, "Unparseable LLM reply, using neutral score");
                NewsVerdict::neutral("unparseable LLM reply")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::llm::MockLlmClient;
    use crate::news::types::NewsArticle;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider whose headlines can be swapped between calls.
    struct SwappableProvider {
        titles: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NewsProvider for SwappableProvider {
        fn name(&self) -> &str {
            "swappable"
        }

        async fn fetch(&self, _symbol: &str) -> anyhow::Result<Vec<NewsArticle>> {
            let titles = self.titles.lock().map_err(|_| anyhow!("poisoned"))?.clone();
            Ok(titles.into_iter().map(NewsArticle::headline).collect())
        }
    }

    fn scorer_with(llm: MockLlmClient, titles: Arc<Mutex<Vec<String>>>, budget: usize) -> NewsScorer {
        let provider: Box<dyn NewsProvider> = Box::new(SwappableProvider { titles });
        let aggregator = NewsAggregator::new(
            vec![provider],
            3,
            5,
            3,
            Duration::minutes(30),
            std::time::Duration::ZERO,
        );
        NewsScorer::new(
            aggregator,
            Arc::new(llm),
            Duration::hours(4),
            budget,
            std::time::Duration::ZERO,
        )
    }

    fn headlines(titles: &[&str]) -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(titles.iter().map(|t| t.to_string()).collect()))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_llm() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .times(1)
            .returning(|_, _| Ok(r#"{"score": 70, "reason": "listing"}"#.to_string()));

        let titles = headlines(&["a", "b", "c"]);
        let mut scorer = scorer_with(llm, titles, 10);
        let mut state = BotState::default();
        let now = Utc::now();

        let first = scorer.score("SOL/USD", MarketRegime::Bull, &mut state, now).await;
        let second = scorer
            .score("SOL/USD", MarketRegime::Bull, &mut state, now + Duration::minutes(5))
            .await;

        assert_eq!(first.score, 70);
        assert!(!first.cached);
        assert_eq!(second.score, 70);
        assert!(second.cached);
    }

    #[tokio::test]
    async fn test_changed_headline_triggers_fresh_call() {
        let mut llm = MockLlmClient::new();
        let mut seq = mockall::Sequence::new();
        llm.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(r#"{"score": 70, "reason": "listing"}"#.to_string()));
        llm.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(r#"{"score": 20, "reason": "exploit"}"#.to_string()));

        let titles = headlines(&["a", "b", "c"]);
        let mut scorer = scorer_with(llm, titles.clone(), 10);
        let mut state = BotState::default();
        let now = Utc::now();

        scorer.score("SOL/USD", MarketRegime::Bull, &mut state, now).await;
        titles.lock().unwrap()[2] = "exploit drains bridge".to_string();
        let fresh = scorer.score("SOL/USD", MarketRegime::Bull, &mut state, now).await;

        assert_eq!(fresh.score, 20);
        assert!(!fresh.cached);
        assert_eq!(state.ai_memory["SOL/USD"].score, 20);
    }

    #[tokio::test]
    async fn test_expired_cache_calls_again() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .times(2)
            .returning(|_, _| Ok(r#"{"score": 64}"#.to_string()));

        let mut scorer = scorer_with(llm, headlines(&["a", "b", "c"]), 10);
        let mut state = BotState::default();
        let now = Utc::now();

        scorer.score("ETH/USD", MarketRegime::Neutral, &mut state, now).await;
        let later = scorer
            .score("ETH/USD", MarketRegime::Neutral, &mut state, now + Duration::hours(4))
            .await;
        assert!(!later.cached);
    }

    #[tokio::test]
    async fn test_failures_default_to_neutral_and_are_not_cached() {
        let mut llm = MockLlmClient::new();
        let mut seq = mockall::Sequence::new();
        llm.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow!("timeout")));
        llm.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("I cannot answer that".to_string()));

        let mut scorer = scorer_with(llm, headlines(&["a", "b", "c"]), 10);
        let mut state = BotState::default();
        let now = Utc::now();

        let errored = scorer.score("BTC/USD", MarketRegime::Bear, &mut state, now).await;
        let garbled = scorer.score("BTC/USD", MarketRegime::Bear, &mut state, now).await;

        assert_eq!(errored.score, 50);
        assert_eq!(garbled.score, 50);
        assert!(state.ai_memory.is_empty());
    }

    struct DownProvider;

    #[async_trait]
    impl NewsProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch(&self, _symbol: &str) -> anyhow::Result<Vec<NewsArticle>> {
            Err(anyhow!("503"))
        }
    }

    #[tokio::test]
    async fn test_open_breakers_lists_failing_providers() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .returning(|_, _| Ok(r#"{"score": 55}"#.to_string()));

        let providers: Vec<Box<dyn NewsProvider>> = vec![
            Box::new(DownProvider),
            Box::new(SwappableProvider {
                titles: headlines(&["a", "b", "c"]),
            }),
        ];
        let aggregator = NewsAggregator::new(
            providers,
            3,
            5,
            1,
            Duration::minutes(30),
            std::time::Duration::ZERO,
        );
        let mut scorer = NewsScorer::new(
            aggregator,
            Arc::new(llm),
            Duration::hours(4),
            3,
            std::time::Duration::ZERO,
        );
        let mut state = BotState::default();
        let now = Utc::now();

        assert!(scorer.open_breakers(now).is_empty());
        scorer.score("SOL/USD", MarketRegime::Bull, &mut state, now).await;

        assert_eq!(scorer.open_breakers(now), vec!["down".to_string()]);
        assert!(scorer.open_breakers(now + Duration::minutes(31)).is_empty());
        assert_eq!(scorer.evaluations(), 1);
    }

    #[tokio::test]
    async fn test_budget_counts_evaluations() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .returning(|_, _| Ok(r#"{"score": 55}"#.to_string()));

        let mut scorer = scorer_with(llm, headlines(&["a", "b", "c"]), 2);
        let mut state = BotState::default();
        let now = Utc::now();

        assert!(scorer.has_budget());
        scorer.score("A/USD", MarketRegime::Bull, &mut state, now).await;
        scorer.score("A/USD", MarketRegime::Bull, &mut state, now).await;
        assert!(!scorer.has_budget());

        scorer.begin_cycle();
        assert!(scorer.has_budget());
        assert_eq!(scorer.evaluations(), 0);
    }
}
