//! LLM adapter - comparable extraction, narrative insight and what-if parsing

use crate::analysis::summary::Insight;
use crate::analysis::Subject;
use crate::providers::prompts;
use crate::providers::rate_limit::RateLimiter;
use crate::providers::search::retry_after;
use crate::providers::types::{Counterfactual, InsightRequest, ProviderError, ProviderResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const FORMAT_TEMPERATURE: f32 = 0.0;
pub const INSIGHT_TEMPERATURE: f32 = 0.8;
pub const COUNTERFACTUAL_TEMPERATURE: f32 = 0.1;

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Pull `{price, area_sqft, beds, baths}` records out of scraped text.
    /// Records are returned raw; the normalizer coerces them.
    async fn format_comps(&self, raw_text: &str, area: &str, city: &str) -> ProviderResult<Vec<Value>>;

    /// Narrate an already computed rating
    async fn insight(&self, request: &InsightRequest<'_>) -> ProviderResult<Insight>;

    /// Turn a what-if question into updated subject attributes
    async fn extract_counterfactual(
        &self,
        current: &Subject,
        user_query: &str,
    ) -> ProviderResult<Counterfactual>;
}

/// Pull the `properties` array out of a format response
pub fn properties_from_json(value: Value) -> Vec<Value> {
    match value {
        Value::Object(mut map) => match map.remove("properties") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// Formatting calls share the search limiter; insight and counterfactual
/// calls draw from the analysis limiter.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    search_limiter: Arc<RateLimiter>,
    analysis_limiter: Arc<RateLimiter>,
}

impl ChatCompletionsClient {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        url: impl Into<String>,
        model: impl Into<String>,
        search_limiter: Arc<RateLimiter>,
        analysis_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            url: url.into(),
            model: model.into(),
            search_limiter,
            analysis_limiter,
        }
    }

    fn build_body(&self, system: &str, user: &str, temperature: f32) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "temperature": temperature,
        })
    }

    async fn complete_json(
        &self,
        call: &str,
        limiter: &RateLimiter,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> ProviderResult<Value> {
        limiter.acquire().await;

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_body(system, user, temperature))
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = retry_after(response.headers());
        let body = response.text().await?;
        if status != 200 {
            return Err(ProviderError::from_status(status, &body, retry_after));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Fatal(format!("failed to parse response: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            info!(
                call,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "LLM usage"
            );
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ProviderError::Fatal("response has no message content".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| ProviderError::Fatal(format!("model returned invalid JSON: {}", e)))
    }
}

#[async_trait]
impl LlmAdapter for ChatCompletionsClient {
    async fn format_comps(&self, raw_text: &str, area: &str, city: &str) -> ProviderResult<Vec<Value>> {
        let value = self
            .complete_json(
                "format_comps",
                &self.search_limiter,
                prompts::FORMAT_COMPS_SYSTEM,
                &prompts::format_comps_prompt(raw_text, area, city),
                FORMAT_TEMPERATURE,
            )
            .await?;

        let properties = properties_from_json(value);
        if properties.is_empty() {
            warn!("Formatter found no listings for {}, {}", area, city);
        }
        Ok(properties)
    }

    async fn insight(&self, request: &InsightRequest<'_>) -> ProviderResult<Insight> {
        let value = self
            .complete_json(
                "insight",
                &self.analysis_limiter,
                prompts::INSIGHT_SYSTEM,
                &prompts::insight_prompt(request),
                INSIGHT_TEMPERATURE,
            )
            .await?;

        serde_json::from_value(value)
            .map_err(|e| ProviderError::Fatal(format!("insight has unexpected shape: {}", e)))
    }

    async fn extract_counterfactual(
        &self,
        current: &Subject,
        user_query: &str,
    ) -> ProviderResult<Counterfactual> {
        let value = self
            .complete_json(
                "extract_counterfactual",
                &self.analysis_limiter,
                prompts::COUNTERFACTUAL_SYSTEM,
                &prompts::counterfactual_prompt(current, user_query),
                COUNTERFACTUAL_TEMPERATURE,
            )
            .await?;

        Ok(Counterfactual::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::rate_limit::{ANALYSIS_REQUESTS_PER_MINUTE, SEARCH_REQUESTS_PER_MINUTE};
    use serde_json::json;

    #[test]
    fn test_properties_from_json() {
        let value = json!({"properties": [{"price": 1}, {"price": 2}]});
        assert_eq!(properties_from_json(value).len(), 2);
        assert!(properties_from_json(json!({"listings": []})).is_empty());
        assert!(properties_from_json(json!("nope")).is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let client = ChatCompletionsClient::new(
            reqwest::Client::new(),
            "sk-test",
            "http://localhost/v1/chat/completions",
            "gpt-4o-mini",
            Arc::new(RateLimiter::per_minute("search", SEARCH_REQUESTS_PER_MINUTE)),
            Arc::new(RateLimiter::per_minute("analysis", ANALYSIS_REQUESTS_PER_MINUTE)),
        );
        let body = client.build_body("sys", "user", INSIGHT_TEMPERATURE);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert!((body["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_insight_deserializes_with_missing_fields() {
        let insight: Insight = serde_json::from_value(json!({
            "investment_summary": "Fair value.",
            "pros": ["a", "b"]
        }))
        .unwrap();
        assert!(insight.cons.is_empty());
        assert!(insight.weighted_analysis.is_none());
    }
}
