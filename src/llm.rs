use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::formatter::PhrasingRequest;
use crate::intent::Intent;
use crate::schema::MetricSpec;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Turns free text into a structured [`Intent`].
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, user_text: &str, metrics: &[MetricSpec]) -> Result<Intent>;
}

/// Rewrites a formatted value as a natural sentence.
#[async_trait]
pub trait Phraser: Send + Sync {
    async fn phrase(&self, request: &PhrasingRequest) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to build LLM HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Self::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_base_url.clone(),
            config.http_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

fn intent_prompt(user_text: &str, metrics: &[MetricSpec]) -> String {
    let metrics_info: Vec<String> = metrics
        .iter()
        .map(|m| format!("- {}: {} (unit: {})", m.id, m.description, m.unit.label()))
        .collect();

    format!(
        r#"Parse the user's monitoring question into JSON.

Available metrics:
{}

User query: "{}"

Respond with ONLY this JSON object:
{{"metric": "exact_metric_id_from_list_or_null", "aggregation": "avg|max|min|sum|none", "time_range": "<integer><s|m|h|d>", "intent": "brief description of what the user wants", "confidence": 0.0-1.0}}

Rules:
1. If no aggregation is mentioned, use "avg".
2. If no time range is mentioned, use "5m".
3. Use the closest metric id from the list; if none fits, use null.
4. Set confidence to how certain you are about the metric."#,
        metrics_info.join("\n"),
        user_text
    )
}

/// Parse the extractor's reply. A single surrounding markdown code fence is
/// tolerated; anything else that is not exactly the intent object is an
/// error.
pub fn parse_intent_response(raw: &str) -> Result<Intent> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```")
                .ok_or_else(|| {
                    AssistantError::IntentParse(format!("Unterminated code fence in response: {}", raw))
                })?
                .trim()
        }
        None => trimmed,
    };

    serde_json::from_str(body).map_err(|e| {
        AssistantError::IntentParse(format!("Failed to parse intent: {}. Response: {}", e, raw))
    })
}

#[async_trait]
impl IntentExtractor for LlmClient {
    async fn extract(&self, user_text: &str, metrics: &[MetricSpec]) -> Result<Intent> {
        let prompt = intent_prompt(user_text, metrics);
        let response = self
            .call_llm(
                "You are a precise JSON-only responder. Always return valid JSON, no other text.",
                &prompt,
                300,
            )
            .await?;
        debug!("Intent extractor replied: {}", response);
        parse_intent_response(&response)
    }
}

#[async_trait]
impl Phraser for LlmClient {
    async fn phrase(&self, request: &PhrasingRequest) -> Result<String> {
        let prompt = format!(
            r#"Write a brief, natural answer (1-2 sentences) to a system monitoring question.

User asked: "{}"
Metric: {}
Aggregation: {}
Value: {}
Time range: {}

Give the value exactly as written, avoid jargon, and respond with only the answer."#,
            request.question,
            request.metric_description,
            request.aggregation,
            request.value,
            request.time_range
        );

        let response = self
            .call_llm("You are a concise system monitoring assistant.", &prompt, 150)
            .await?;
        Ok(response.trim().to_string())
    }
}
