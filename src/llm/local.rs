//! Local Ollama backend.
//!
//! When the configured model cannot be loaded the backend switches to the
//! fallback model for the rest of the process and retries once.

use crate::config::LlmConfig;
use crate::error::{QueryBotError, Result};
use crate::llm::{BackendKind, GenerationRequest, GenerationResult, LlmBackend, TokenUsage};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

pub struct LocalBackend {
    client: reqwest::Client,
    base_url: String,
    active_model: Mutex<String>,
    fallback_model: String,
    use_gpu: bool,
    connectivity_timeout: Duration,
}

enum LocalFailure {
    ModelNotLoaded(String),
    Other(QueryBotError),
}

impl LocalBackend {
    pub fn new(
        base_url: String,
        model: String,
        fallback_model: String,
        use_gpu: bool,
        connectivity_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| QueryBotError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            active_model: Mutex::new(model),
            fallback_model,
            use_gpu,
            connectivity_timeout,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            config.ollama_base_url.clone(),
            config.ollama_model.clone(),
            config.ollama_fallback_model.clone(),
            config.use_gpu,
            config.connectivity_timeout,
        )
    }

    fn current_model(&self) -> String {
        self.active_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn switch_to_fallback(&self) {
        *self
            .active_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = self.fallback_model.clone();
    }

    async fn generate_with(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResult, LocalFailure> {
        let body = ollama_payload(model, request, self.use_gpu);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                LocalFailure::Other(QueryBotError::BackendUnavailable(format!(
                    "Ollama not reachable at {}: {}",
                    self.base_url, e
                )))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            if is_model_load_failure(status, &error_text) {
                return Err(LocalFailure::ModelNotLoaded(error_text));
            }
            return Err(LocalFailure::Other(QueryBotError::BackendUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            ))));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            LocalFailure::Other(QueryBotError::Llm(format!("Failed to parse Ollama response: {}", e)))
        })?;
        let (text, token_usage) =
            parse_ollama(&response_json, &request.prompt).map_err(LocalFailure::Other)?;

        Ok(GenerationResult {
            text,
            backend_used: BackendKind::Local,
            model: model.to_string(),
            token_usage,
            latency_ms: 0,
        })
    }
}

#[async_trait]
impl LlmBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> String {
        self.current_model()
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.connectivity_timeout)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let model = self.current_model();
        match self.generate_with(&model, request).await {
            Ok(result) => Ok(result),
            Err(LocalFailure::Other(e)) => Err(e),
            Err(LocalFailure::ModelNotLoaded(reason)) => {
                if model == self.fallback_model {
                    return Err(QueryBotError::BackendUnavailable(format!(
                        "Local model '{}' failed to load: {}",
                        model, reason
                    )));
                }
                warn!(
                    "Local model '{}' failed to load ({}), switching to '{}'",
                    model, reason, self.fallback_model
                );
                self.switch_to_fallback();
                match self.generate_with(&self.fallback_model, request).await {
                    Ok(result) => Ok(result),
                    Err(LocalFailure::Other(e)) => Err(e),
                    Err(LocalFailure::ModelNotLoaded(reason)) => Err(QueryBotError::BackendUnavailable(
                        format!("Fallback model '{}' failed to load: {}", self.fallback_model, reason),
                    )),
                }
            }
        }
    }
}

fn ollama_payload(model: &str, request: &GenerationRequest, use_gpu: bool) -> serde_json::Value {
    let mut options = serde_json::json!({
        "num_predict": request.max_tokens,
        "temperature": request.temperature,
        "top_p": 0.9,
        "top_k": 40,
        "repeat_penalty": 1.1
    });
    if !use_gpu {
        options["num_gpu"] = serde_json::json!(0);
    }

    let mut body = serde_json::json!({
        "model": model,
        "prompt": request.prompt,
        "stream": false,
        "options": options
    });
    if let Some(ref system) = request.system {
        body["system"] = serde_json::json!(system);
    }
    body
}

fn is_model_load_failure(status: StatusCode, body: &str) -> bool {
    let body = body.to_lowercase();
    status == StatusCode::NOT_FOUND
        || (body.contains("model") && (body.contains("not found") || body.contains("failed to load")))
}

/// Response text plus token counts; Ollama reports eval counts, otherwise
/// whitespace-separated words stand in for tokens.
pub(crate) fn parse_ollama(response_json: &serde_json::Value, prompt: &str) -> Result<(String, TokenUsage)> {
    let text = response_json["response"]
        .as_str()
        .ok_or_else(|| QueryBotError::Llm("No response text from Ollama".to_string()))?
        .trim()
        .to_string();

    let prompt_tokens = response_json["prompt_eval_count"]
        .as_u64()
        .map(|n| n as u32)
        .unwrap_or_else(|| prompt.split_whitespace().count() as u32);
    let completion_tokens = response_json["eval_count"]
        .as_u64()
        .map(|n| n as u32)
        .unwrap_or_else(|| text.split_whitespace().count() as u32);

    Ok((
        text,
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    ))
}
