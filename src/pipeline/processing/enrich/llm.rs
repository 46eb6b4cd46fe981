//! Chat-completions client for AI sentiment labels.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Enricher, EnrichmentLabels};
use crate::config::EnrichConfig;
use crate::domain::{Emotion, SentimentLabel};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::ingestion::rate_limiter::{Limits, RateLimiter};

const SYSTEM_PROMPT: &str = "You label audience feedback about podcast and video episodes. \
Reply with a single JSON object and nothing else: \
{\"sentiment\": \"positive\" | \"neutral\" | \"negative\", \
\"emotion\": \"joy\" | \"sadness\" | \"anger\" | \"fear\" | \"surprise\" | \"disgust\" | \"neutral\", \
\"confidence\": number between 0 and 1, \
\"score\": number between -1 (most negative) and 1 (most positive)}";

/// Rough prompt overhead in tokens, added to the per-text estimate
const PROMPT_TOKENS: u64 = 120;
/// Response budget in tokens
const COMPLETION_TOKENS: u64 = 60;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid fence regex"));

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

enum CallError {
    Retryable { error: PipelineError, retry_after: Option<Duration> },
    Fatal(PipelineError),
}

/// OpenAI-compatible chat-completions enricher
pub struct LlmEnricher {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    limiter: RateLimiter,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl LlmEnricher {
    /// Build from config, reading the API key from `api_key_env`.
    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::Config(format!(
                "LLM provider selected but {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(config, Some(api_key))
    }

    pub fn new(config: &EnrichConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("audience_pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            limiter: RateLimiter::new(Limits {
                requests_per_min: config.requests_per_min,
                units_per_min: config.tokens_per_min,
            }),
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
        })
    }

    fn request_body(&self, text: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": COMPLETION_TOKENS,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text },
            ],
        })
    }

    async fn send_once(&self, body: &Value) -> std::result::Result<String, CallError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                metrics::enrich::api_error("network");
                return Err(CallError::Retryable { error: e.into(), retry_after: None });
            }
        };

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| CallError::Fatal(PipelineError::Http(e)))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    CallError::Fatal(PipelineError::Api {
                        message: "chat completion had no message content".to_string(),
                    })
                });
        }

        metrics::enrich::api_error(status.as_str());
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER));
        let error_text = response.text().await.unwrap_or_default();
        let error = PipelineError::Api {
            message: format!("chat completion failed ({}): {}", status, truncate(&error_text, 200)),
        };

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(CallError::Retryable { error, retry_after })
        } else {
            Err(CallError::Fatal(error))
        }
    }

    /// Post with retry: 429, 5xx and network errors back off and retry,
    /// other client errors fail immediately.
    async fn complete(&self, text: &str) -> Result<String> {
        let body = self.request_body(text);
        let cost = estimate_tokens(text);
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire(cost).await;
            let started = Instant::now();
            match self.send_once(&body).await {
                Ok(content) => {
                    metrics::enrich::api_call(&self.model, started.elapsed().as_secs_f64());
                    return Ok(content);
                }
                Err(CallError::Fatal(error)) => return Err(error),
                Err(CallError::Retryable { error, retry_after }) => {
                    if attempt >= self.max_retries {
                        return Err(error);
                    }
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(self.backoff_base_ms, attempt));
                    warn!(
                        "Chat completion attempt {}/{} failed: {}; retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    fn name(&self) -> &str {
        &self.model
    }

    async fn enrich(&self, text: &str) -> Result<EnrichmentLabels> {
        let content = self.complete(text).await?;
        debug!("LLM replied: {}", truncate(&content, 120));
        parse_llm_content(&content)
    }
}

/// `base * 2^attempt`, attempt counted from zero
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(16)))
}

/// About four characters per token, plus the fixed prompt and reply
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4) + PROMPT_TOKENS + COMPLETION_TOKENS
}

/// Pull the label object out of a model reply, tolerating code fences and prose.
pub fn parse_llm_content(content: &str) -> Result<EnrichmentLabels> {
    let body = CODE_FENCE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content);
    let start = body.find('{');
    let end = body.rfind('}');
    let object = match (start, end) {
        (Some(s), Some(e)) if s < e => &body[s..=e],
        _ => {
            return Err(PipelineError::Enrichment(format!(
                "no JSON object in reply: {}",
                truncate(content, 80)
            )))
        }
    };
    let value: Value = serde_json::from_str(object)?;

    let sentiment = value
        .get("sentiment")
        .and_then(Value::as_str)
        .and_then(SentimentLabel::parse_loose)
        .ok_or_else(|| PipelineError::Enrichment(format!("reply has no usable sentiment: {}", object)))?;
    let emotion = value
        .get("emotion")
        .and_then(Value::as_str)
        .and_then(Emotion::parse_loose)
        .unwrap_or(Emotion::Neutral);
    let confidence = number(&value, "confidence").map(|c| c.clamp(0.0, 1.0)).unwrap_or(0.5);
    let score = number(&value, "score")
        .map(|s| s.clamp(-1.0, 1.0))
        .unwrap_or(match sentiment {
            SentimentLabel::Positive => confidence,
            SentimentLabel::Negative => -confidence,
            SentimentLabel::Neutral => 0.0,
        });

    Ok(EnrichmentLabels { sentiment, score, emotion, confidence })
}

fn number(value: &Value, key: &str) -> Option<f64> {
    let n = match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_reply() {
        let labels = parse_llm_content(
            r#"{"sentiment": "Positive", "emotion": "joy", "confidence": 0.92, "score": 0.8}"#,
        )
        .unwrap();
        assert_eq!(labels.sentiment, SentimentLabel::Positive);
        assert_eq!(labels.emotion, Emotion::Joy);
        assert_eq!(labels.confidence, 0.92);
        assert_eq!(labels.score, 0.8);
    }

    #[test]
    fn tolerates_fences_and_prose() {
        let reply = "Sure! Here is the result:\n```json\n{\"sentiment\": \"negative\", \"emotion\": \"anger\", \"confidence\": \"0.7\"}\n```\nHope that helps.";
        let labels = parse_llm_content(reply).unwrap();
        assert_eq!(labels.sentiment, SentimentLabel::Negative);
        assert_eq!(labels.emotion, Emotion::Anger);
        assert_eq!(labels.score, -0.7);
    }

    #[test]
    fn clamps_out_of_range_numbers() {
        let labels =
            parse_llm_content(r#"{"sentiment": "neutral", "emotion": "bored", "confidence": 3, "score": -9}"#)
                .unwrap();
        assert_eq!(labels.confidence, 1.0);
        assert_eq!(labels.score, -1.0);
        assert_eq!(labels.emotion, Emotion::Neutral);
    }

    #[test]
    fn rejects_replies_without_labels() {
        assert!(parse_llm_content("I cannot help with that").is_err());
        assert!(parse_llm_content(r#"{"emotion": "joy"}"#).is_err());
        assert!(parse_llm_content(r#"{"sentiment": "great"}"#).is_err());
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(500, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(4000));
    }

    #[test]
    fn token_estimate_grows_with_text() {
        assert_eq!(estimate_tokens(""), PROMPT_TOKENS + COMPLETION_TOKENS);
        assert_eq!(estimate_tokens("abcde"), 2 + PROMPT_TOKENS + COMPLETION_TOKENS);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = EnrichConfig {
            api_key_env: "AUDIENCE_PULSE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..EnrichConfig::default()
        };
        assert!(matches!(LlmEnricher::from_config(&config), Err(PipelineError::Config(_))));
    }
}
