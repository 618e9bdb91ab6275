//! Language Model Gateway
//!
//! A uniform `generate` over a hosted chat-completions backend and a local
//! Ollama backend. `Auto` prefers the hosted backend when it is configured
//! and reachable, and otherwise (or when it fails mid-call) uses the local one.

pub mod hosted;
pub mod local;

use crate::config::LlmConfig;
use crate::error::{QueryBotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use hosted::HostedBackend;
pub use local::LocalBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Auto,
    Hosted,
    Local,
}

impl FromStr for LlmMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(LlmMode::Auto),
            "hosted" | "openai" => Ok(LlmMode::Hosted),
            "local" | "ollama" => Ok(LlmMode::Local),
            other => Err(format!("unknown LLM mode '{}'", other)),
        }
    }
}

impl fmt::Display for LlmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmMode::Auto => write!(f, "auto"),
            LlmMode::Hosted => write!(f, "hosted"),
            LlmMode::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Hosted,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Hosted => write!(f, "hosted"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// Per-call override of the gateway's configured mode.
    pub mode: Option<LlmMode>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub backend_used: BackendKind,
    pub model: String,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Model currently answering requests.
    fn model(&self) -> String;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub configured_mode: LlmMode,
    pub hosted_configured: bool,
    pub local_configured: bool,
    pub hosted_model: Option<String>,
    pub local_model: Option<String>,
    /// Backend the configured mode resolves to right now, if any.
    pub effective_mode: Option<BackendKind>,
}

pub struct LlmGateway {
    mode: LlmMode,
    hosted: Option<Arc<dyn LlmBackend>>,
    local: Option<Arc<dyn LlmBackend>>,
    generation_timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl LlmGateway {
    pub fn new(
        mode: LlmMode,
        hosted: Option<Arc<dyn LlmBackend>>,
        local: Option<Arc<dyn LlmBackend>>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            hosted,
            local,
            generation_timeout,
            temperature: 0.1,
            max_tokens: 300,
        }
    }

    /// Build both backends from configuration. The hosted backend only
    /// exists when an API key is set.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let hosted: Option<Arc<dyn LlmBackend>> = if config.hosted_configured() {
            Some(Arc::new(HostedBackend::from_config(config)?))
        } else {
            if config.mode == LlmMode::Hosted {
                warn!("LLM_MODE=hosted but OPENAI_API_KEY is not set; generation will fail");
            }
            None
        };
        let local: Option<Arc<dyn LlmBackend>> = Some(Arc::new(LocalBackend::from_config(config)?));

        Ok(Self::new(config.mode, hosted, local, config.generation_timeout)
            .with_sampling(config.temperature, config.max_tokens))
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    /// A request carrying the gateway's sampling defaults.
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            system: None,
            mode: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn LlmBackend>> {
        let backend = match kind {
            BackendKind::Hosted => self.hosted.as_ref(),
            BackendKind::Local => self.local.as_ref(),
        };
        backend.ok_or_else(|| {
            QueryBotError::BackendUnavailable(format!("{} backend is not configured", kind))
        })
    }

    /// Pick the backend a mode maps to.
    pub async fn resolve(&self, mode: LlmMode) -> Result<BackendKind> {
        match mode {
            LlmMode::Hosted => self.backend(BackendKind::Hosted).map(|_| BackendKind::Hosted),
            LlmMode::Local => self.backend(BackendKind::Local).map(|_| BackendKind::Local),
            LlmMode::Auto => {
                if let Some(ref hosted) = self.hosted {
                    if hosted.is_available().await {
                        return Ok(BackendKind::Hosted);
                    }
                    if self.local.is_some() {
                        info!("Hosted backend unreachable, auto mode using local backend");
                        return Ok(BackendKind::Local);
                    }
                    return Ok(BackendKind::Hosted);
                }
                self.backend(BackendKind::Local).map(|_| BackendKind::Local)
            }
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let selected = request.mode.unwrap_or(self.mode);
        let kind = self.resolve(selected).await?;

        match self.call(kind, request).await {
            Err(e)
                if selected == LlmMode::Auto
                    && kind == BackendKind::Hosted
                    && e.is_backend_failure()
                    && self.local.is_some() =>
            {
                warn!("Hosted generation failed ({}), auto mode retrying on local backend", e);
                self.call(BackendKind::Local, request).await
            }
            other => other,
        }
    }

    async fn call(&self, kind: BackendKind, request: &GenerationRequest) -> Result<GenerationResult> {
        let backend = self.backend(kind)?;
        let started = Instant::now();
        let mut result = tokio::time::timeout(self.generation_timeout, backend.generate(request))
            .await
            .map_err(|_| QueryBotError::GenerationTimeout(self.generation_timeout))??;
        result.latency_ms = started.elapsed().as_millis() as u64;
        // the backend in the slot is the one that answered
        result.backend_used = backend.kind();
        debug!(
            "{} backend ({}) answered in {} ms using {} tokens",
            result.backend_used, result.model, result.latency_ms, result.token_usage.total_tokens
        );
        Ok(result)
    }

    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            configured_mode: self.mode,
            hosted_configured: self.hosted.is_some(),
            local_configured: self.local.is_some(),
            hosted_model: self.hosted.as_ref().map(|b| b.model()),
            local_model: self.local.as_ref().map(|b| b.model()),
            effective_mode: self.resolve(self.mode).await.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        kind: BackendKind,
        available: bool,
        fail_with: Option<fn() -> QueryBotError>,
        delay: Duration,
        /// What `generate` claims in `backend_used`.
        reports: BackendKind,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                available: true,
                fail_with: None,
                delay: Duration::ZERO,
                reports: kind,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn model(&self) -> String {
            format!("{}-model", self.kind)
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(GenerationResult {
                text: format!("from {}", self.kind),
                backend_used: self.reports,
                model: self.model(),
                token_usage: TokenUsage::default(),
                latency_ms: 0,
            })
        }
    }

    fn gateway(mode: LlmMode, hosted: Option<Arc<Scripted>>, local: Option<Arc<Scripted>>) -> LlmGateway {
        LlmGateway::new(
            mode,
            hosted.map(|b| b as Arc<dyn LlmBackend>),
            local.map(|b| b as Arc<dyn LlmBackend>),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn parses_modes() {
        assert_eq!("openai".parse::<LlmMode>().unwrap(), LlmMode::Hosted);
        assert_eq!("AUTO".parse::<LlmMode>().unwrap(), LlmMode::Auto);
        assert_eq!("local".parse::<LlmMode>().unwrap(), LlmMode::Local);
        assert!("gpt".parse::<LlmMode>().is_err());
    }

    #[tokio::test]
    async fn auto_prefers_reachable_hosted() {
        let gw = gateway(
            LlmMode::Auto,
            Some(Arc::new(Scripted::new(BackendKind::Hosted))),
            Some(Arc::new(Scripted::new(BackendKind::Local))),
        );
        let result = gw.generate(&gw.request("q")).await.unwrap();
        assert_eq!(result.backend_used, BackendKind::Hosted);
    }

    #[tokio::test]
    async fn auto_uses_local_when_hosted_unreachable() {
        let mut hosted = Scripted::new(BackendKind::Hosted);
        hosted.available = false;
        let hosted = Arc::new(hosted);
        let gw = gateway(LlmMode::Auto, Some(hosted.clone()), Some(Arc::new(Scripted::new(BackendKind::Local))));

        let result = gw.generate(&gw.request("q")).await.unwrap();
        assert_eq!(result.backend_used, BackendKind::Local);
        assert_eq!(hosted.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gw.status().await.effective_mode, Some(BackendKind::Local));
    }

    #[tokio::test]
    async fn auto_falls_back_after_hosted_failure() {
        let mut hosted = Scripted::new(BackendKind::Hosted);
        hosted.fail_with = Some(|| QueryBotError::BackendUnavailable("503".to_string()));
        let gw = gateway(LlmMode::Auto, Some(Arc::new(hosted)), Some(Arc::new(Scripted::new(BackendKind::Local))));

        let result = gw.generate(&gw.request("q")).await.unwrap();
        assert_eq!(result.backend_used, BackendKind::Local);
    }

    #[tokio::test]
    async fn pinned_mode_surfaces_backend_failure() {
        let mut hosted = Scripted::new(BackendKind::Hosted);
        hosted.fail_with = Some(|| QueryBotError::BackendUnavailable("503".to_string()));
        let local = Arc::new(Scripted::new(BackendKind::Local));
        let gw = gateway(LlmMode::Hosted, Some(Arc::new(hosted)), Some(local.clone()));

        let err = gw.generate(&gw.request("q")).await.unwrap_err();
        assert!(matches!(err, QueryBotError::BackendUnavailable(_)));
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let mut local = Scripted::new(BackendKind::Local);
        local.delay = Duration::from_secs(5);
        let gw = gateway(LlmMode::Local, None, Some(Arc::new(local)));

        let err = gw.generate(&gw.request("q")).await.unwrap_err();
        assert!(matches!(err, QueryBotError::GenerationTimeout(_)));
    }

    #[tokio::test]
    async fn hosted_mode_without_backend_is_unavailable() {
        let gw = gateway(LlmMode::Hosted, None, Some(Arc::new(Scripted::new(BackendKind::Local))));
        let err = gw.generate(&gw.request("q")).await.unwrap_err();
        assert!(matches!(err, QueryBotError::BackendUnavailable(_)));

        let mut request = gw.request("q");
        request.mode = Some(LlmMode::Local);
        assert_eq!(gw.generate(&request).await.unwrap().backend_used, BackendKind::Local);
    }

    #[tokio::test]
    async fn backend_used_comes_from_the_slot_that_answered() {
        let mut local = Scripted::new(BackendKind::Local);
        local.reports = BackendKind::Hosted;
        let gw = gateway(LlmMode::Local, None, Some(Arc::new(local)));

        let result = gw.generate(&gw.request("q")).await.unwrap();
        assert_eq!(result.backend_used, BackendKind::Local);
    }

    #[test]
    fn requests_carry_sampling_settings() {
        let gw = gateway(LlmMode::Local, None, Some(Arc::new(Scripted::new(BackendKind::Local))));
        let request = gw.request("q");
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, 300);

        let request = gw.with_sampling(0.0, 64).request("q");
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, 64);
    }
}
