//! Ordered news providers with per-provider circuit breakers.
//!
//! Providers are tried in order. A provider is only consulted when the
//! articles gathered so far fall short of the minimum. Results are merged,
//! de-duplicated by title and truncated.

use crate::news::types::NewsArticle;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A source of recent news for a symbol.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Recent articles for `symbol` (`BASE/QUOTE`), newest first.
    async fn fetch(&self, symbol: &str) -> anyhow::Result<Vec<NewsArticle>>;
}

/// Breaker state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
        match self.open_until {
            Some(until) if now < until => BreakerState::Open { until },
            _ => BreakerState::Closed,
        }
    }

    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == BreakerState::Closed
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Count a failure. Returns true when this failure opened the breaker.
    ///
    /// After the cooldown one trial call is let through; if it fails the
    /// breaker opens again right away.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.failure_threshold {
            self.open_until = Some(now + self.cooldown);
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

struct ProviderSlot {
    provider: Box<dyn NewsProvider>,
    breaker: CircuitBreaker,
}

/// Walks the provider list for one symbol.
pub struct NewsAggregator {
    slots: Vec<ProviderSlot>,
    min_articles: usize,
    max_articles: usize,
    request_delay: std::time::Duration,
}

impl NewsAggregator {
    pub fn new(
        providers: Vec<Box<dyn NewsProvider>>,
        min_articles: usize,
        max_articles: usize,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
        request_delay: std::time::Duration,
    ) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                breaker: CircuitBreaker::new(breaker_threshold, breaker_cooldown),
            })
            .collect();
        Self {
            slots,
            min_articles,
            max_articles,
            request_delay,
        }
    }

    /// Gather articles, falling back to the placeholder when nothing was found.
    pub async fn gather(&mut self, symbol: &str, now: DateTime<Utc>) -> Vec<NewsArticle> {
        let mut articles: Vec<NewsArticle> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for slot in &mut self.slots {
            if articles.len() >= self.min_articles {
                break;
            }
            let name = slot.provider.name().to_string();
            if let BreakerState::Open { until } = slot.breaker.state(now) {
                debug!(provider = %name, %until, "Provider breaker open, skipping");
                continue;
            }

            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            match slot.provider.fetch(symbol).await {
                Ok(found) => {
                    slot.breaker.record_success();
                    let before = articles.len();
                    for article in found {
                        if seen.insert(article.title.trim().to_lowercase()) {
                            articles.push(article);
                        }
                    }
                    debug!(provider = %name, %symbol, added = articles.len() - before, "News fetched");
                }
                Err(e) => {
                    let opened = slot.breaker.record_failure(now);
                    warn!(provider = %name, %symbol, error = %e, "News provider failed");
                    if opened {
                        info!(
                            provider = %name,
                            failures = slot.breaker.consecutive_failures(),
                            "Provider breaker opened"
                        );
                    }
                }
            }
        }

        articles.truncate(self.max_articles);
        if articles.is_empty() {
            debug!(%symbol, "No news from any provider");
            articles.push(NewsArticle::placeholder());
        }
        articles
    }

    /// Current breaker state per provider, in provider order.
    pub fn breaker_states(&self, now: DateTime<Utc>) -> Vec<(String, BreakerState)> {
        self.slots
            .iter()
            .map(|s| (s.provider.name().to_string(), s.breaker.state(now)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::types::NO_NEWS_HEADLINE;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticProvider {
        name: &'static str,
        titles: Vec<&'static str>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl StaticProvider {
        fn boxed(name: &'static str, titles: Vec<&'static str>, fail: bool) -> (Box<dyn NewsProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                name,
                titles,
                fail,
                calls: calls.clone(),
            };
            (Box::new(provider), calls)
        }
    }

    #[async_trait]
    impl NewsProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _symbol: &str) -> anyhow::Result<Vec<NewsArticle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("{} down", self.name));
            }
            Ok(self.titles.iter().map(|t| NewsArticle::headline(*t)).collect())
        }
    }

    fn aggregator(providers: Vec<Box<dyn NewsProvider>>) -> NewsAggregator {
        NewsAggregator::new(providers, 3, 5, 3, Duration::minutes(30), std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn test_primary_sufficient_skips_fallback() {
        let (primary, _) = StaticProvider::boxed("primary", vec!["a", "b", "c"], false);
        let (fallback, fallback_calls) = StaticProvider::boxed("fallback", vec!["d"], false);
        let mut agg = aggregator(vec![primary, fallback]);

        let articles = agg.gather("BTC/USD", Utc::now()).await;
        assert_eq!(articles.len(), 3);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_merges_and_dedupes() {
        let (primary, _) = StaticProvider::boxed("primary", vec!["ETF news", "Hack"], false);
        let (fallback, _) =
            StaticProvider::boxed("fallback", vec!["etf news", "Upgrade", "Listing", "Rally", "Dip"], false);
        let mut agg = aggregator(vec![primary, fallback]);

        let titles: Vec<String> = agg
            .gather("BTC/USD", Utc::now())
            .await
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["ETF news", "Hack", "Upgrade", "Listing", "Rally"]);
    }

    #[tokio::test]
    async fn test_all_empty_yields_placeholder() {
        let (primary, _) = StaticProvider::boxed("primary", vec![], true);
        let (fallback, _) = StaticProvider::boxed("fallback", vec![], false);
        let mut agg = aggregator(vec![primary, fallback]);

        let articles = agg.gather("BTC/USD", Utc::now()).await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, NO_NEWS_HEADLINE);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_provider() {
        let (primary, primary_calls) = StaticProvider::boxed("primary", vec![], true);
        let mut agg = aggregator(vec![primary]);
        let now = Utc::now();

        for _ in 0..3 {
            agg.gather("BTC/USD", now).await;
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert!(matches!(agg.breaker_states(now)[0].1, BreakerState::Open { .. }));

        agg.gather("BTC/USD", now + Duration::minutes(10)).await;
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);

        agg.gather("BTC/USD", now + Duration::minutes(31)).await;
        assert_eq!(primary_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_breaker_success_closes() {
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new(2, Duration::minutes(30));
        assert!(!breaker.record_failure(now));
        assert!(breaker.record_failure(now));
        assert!(!breaker.allows(now));

        breaker.record_success();
        assert!(breaker.allows(now));
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
