//! LLM adapter for news sentiment.
//!
//! The client is an OpenAI-compatible `/chat/completions` endpoint asked for a
//! JSON object `{"score": <int>, "reason": <string>}`. Replies are parsed
//! leniently: the first `{...}` span is taken and the score clamped to 0..=100.

use crate::config::LlmConfig;
use crate::news::types::NewsArticle;
use crate::strategy::MarketRegime;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// A chat model that answers one prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a system and user prompt, returning the raw reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call LLM")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            anyhow::bail!("LLM returned status {}: {}", status, excerpt);
        }

        let reply: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("LLM response had no content")?;
        debug!(chars = content.len(), "LLM replied");
        Ok(content)
    }
}

/// System prompt with the scoring bands.
pub const SYSTEM_PROMPT: &str = "You are a crypto news analyst. Rate how the news affects the \
short-term price outlook of the asset on a 0-100 scale: 0-30 bad news, sell; 31-49 weak; \
50 neutral or no news; 51-79 good; 80-100 strong buy catalyst. \
Respond only with JSON: {\"score\": <int>, \"reason\": <short string>}.";

/// Regime-specific guidance prepended to the headlines.
fn regime_guidance(regime: MarketRegime) -> &'static str {
    match regime {
        MarketRegime::Bear => {
            "The overall market is in a downtrend. Be conservative: only clearly strong, \
             asset-specific catalysts deserve a high score."
        }
        MarketRegime::Bull => {
            "The overall market is in an uptrend. Look for momentum and catalysts that can \
             extend the move."
        }
        MarketRegime::Neutral => {
            "The overall market is range-bound. Weigh positive and negative news evenly."
        }
    }
}

/// Build the user prompt for one symbol.
pub fn build_prompt(symbol: &str, regime: MarketRegime, articles: &[NewsArticle]) -> String {
    let mut prompt = format!(
        "Asset: {}\nMarket regime: {}\n{}\n\nRecent news:\n",
        symbol,
        regime,
        regime_guidance(regime)
    );
    for article in articles {
        prompt.push_str("- ");
        prompt.push_str(&article.title);
        if let Some(source) = &article.source {
            prompt.push_str(" (");
            prompt.push_str(source);
            prompt.push(')');
        }
        if let Some(snippet) = &article.snippet {
            prompt.push_str(": ");
            prompt.push_str(snippet);
        }
        prompt.push('\n');
    }
    prompt
}

/// Extract `(score, reason)` from a model reply. `None` when no usable score is present.
pub fn parse_verdict(reply: &str) -> Option<(u8, String)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;

    let raw = match value.get("score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let score = raw.round().clamp(0.0, 100.0) as u8;
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Some((score, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_verdict_lenient() {
        assert_eq!(
            parse_verdict(r#"{"score": 72, "reason": "ETF inflows"}"#),
            Some((72, "ETF inflows".to_string()))
        );
        assert_eq!(
            parse_verdict("Sure! ```json\n{\"score\": \"65\", \"reason\": \"ok\"}\n```"),
            Some((65, "ok".to_string()))
        );
        assert_eq!(parse_verdict(r#"{"score": 140}"#), Some((100, String::new())));
        assert_eq!(parse_verdict(r#"{"score": -3, "reason": "hack"}"#), Some((0, "hack".to_string())));
        assert_eq!(parse_verdict("no json here"), None);
        assert_eq!(parse_verdict(r#"{"reason": "missing score"}"#), None);
        assert_eq!(parse_verdict(r#"{"score": "high"}"#), None);
    }

    #[test]
    fn test_prompt_carries_regime_and_headlines() {
        let articles = vec![NewsArticle {
            source: Some("Reuters".to_string()),
            ..NewsArticle::headline("Exchange lists token")
        }];
        let prompt = build_prompt("SOL/USD", MarketRegime::Bear, &articles);
        assert!(prompt.contains("Market regime: BEAR"));
        assert!(prompt.contains("Be conservative"));
        assert!(prompt.contains("- Exchange lists token (Reuters)"));
    }

    #[tokio::test]
    async fn test_openai_client_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"score\": 61, \"reason\": \"listing\"}"}}]
            })))
            .mount(&server)
            .await;

        let config = LlmConfig {
            api_key: "sk-test".to_string(),
            base_url: server.uri(),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::new(&config).unwrap();
        let reply = client.complete(SYSTEM_PROMPT, "prompt").await.unwrap();
        assert_eq!(parse_verdict(&reply), Some((61, "listing".to_string())));
    }

    #[tokio::test]
    async fn test_openai_client_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let config = LlmConfig {
            api_key: "sk-test".to_string(),
            base_url: server.uri(),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::new(&config).unwrap();
        assert!(client.complete(SYSTEM_PROMPT, "prompt").await.is_err());
    }
}
