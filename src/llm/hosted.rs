//! OpenAI-compatible chat completions backend.

use crate::config::LlmConfig;
use crate::error::{QueryBotError, Result};
use crate::llm::{BackendKind, GenerationRequest, GenerationResult, LlmBackend, TokenUsage};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful SQLite expert. Answer with a single SQL query and nothing else.";

pub struct HostedBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    connectivity_timeout: Duration,
}

impl HostedBackend {
    pub fn new(api_key: String, base_url: String, model: String, connectivity_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| QueryBotError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            connectivity_timeout,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| QueryBotError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(
            api_key,
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            config.connectivity_timeout,
        )
    }
}

#[async_trait]
impl LlmBackend for HostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.connectivity_timeout)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let system = request.system.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": request.prompt}
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryBotError::BackendUnavailable(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("LLM API error ({}): {}", status, error_text);
            return Err(if is_unavailable_status(status) {
                QueryBotError::BackendUnavailable(message)
            } else {
                QueryBotError::Llm(message)
            });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryBotError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        let (text, token_usage) = parse_chat_completion(&response_json)?;

        Ok(GenerationResult {
            text,
            backend_used: BackendKind::Hosted,
            model: self.model.clone(),
            token_usage,
            latency_ms: 0,
        })
    }
}

/// Statuses after which another backend may succeed where this one will not.
fn is_unavailable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
}

pub(crate) fn parse_chat_completion(response_json: &serde_json::Value) -> Result<(String, TokenUsage)> {
    let content = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| QueryBotError::Llm("No content in LLM response".to_string()))?;

    let usage = &response_json["usage"];
    let field = |name: &str| usage[name].as_u64().unwrap_or(0) as u32;
    let prompt_tokens = field("prompt_tokens");
    let completion_tokens = field("completion_tokens");
    let total_tokens = match field("total_tokens") {
        0 => prompt_tokens + completion_tokens,
        total => total,
    };

    Ok((
        content.trim().to_string(),
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
    ))
}
