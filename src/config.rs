//! Runtime configuration
//!
//! Built once at process start from environment variables (a `.env` file is
//! honoured) and passed by reference into every component constructor.

use crate::error::{QueryBotError, Result};
use crate::execution::summarizer::SummaryMode;
use crate::llm::LlmMode;
use crate::schema_rag::RetrievalMode;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tables the medical demo database ships with.
pub const DEFAULT_ALLOWED_TABLES: &[&str] = &[
    "json_patients",
    "json_admissions",
    "json_providers",
    "json_transfers",
    "json_lab",
    "json_diagnoses",
    "json_insurance",
    "json_careunits",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub allowed_tables: Vec<String>,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub execution_timeout: Duration,
    pub max_sql_length: usize,
    pub summary_mode: SummaryMode,
    pub history_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub mode: RetrievalMode,
    pub top_k: usize,
    /// Weight of the semantic score; the keyword score gets `1 - alpha`.
    pub alpha: f32,
    pub embedding_model: String,
    pub embedding_base_url: String,
    pub notes_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub mode: LlmMode,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub ollama_fallback_model: String,
    pub use_gpu: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub generation_timeout: Duration,
    pub connectivity_timeout: Duration,
}

impl LlmConfig {
    pub fn hosted_configured(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let allowed_tables = match get("ALLOWED_TABLES") {
            Some(raw) => raw
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>(),
            None => DEFAULT_ALLOWED_TABLES.iter().map(|t| t.to_string()).collect(),
        };
        if allowed_tables.is_empty() {
            return Err(QueryBotError::Config(
                "ALLOWED_TABLES must name at least one table".to_string(),
            ));
        }

        let top_k: usize = parse_or(&get, "RETRIEVAL_TOP_K", 3)?;
        if top_k == 0 {
            return Err(QueryBotError::Config("RETRIEVAL_TOP_K must be at least 1".to_string()));
        }
        let alpha: f32 = parse_or(&get, "RETRIEVAL_ALPHA", 0.6)?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(QueryBotError::Config(format!(
                "RETRIEVAL_ALPHA must be within [0, 1], got {}",
                alpha
            )));
        }

        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let retrieval = RetrievalConfig {
            mode: parse_or(&get, "RETRIEVAL_MODE", RetrievalMode::Hybrid)?,
            top_k,
            alpha,
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_base_url: get("EMBEDDING_BASE_URL").unwrap_or_else(|| openai_base_url.clone()),
            notes_path: get("SCHEMA_NOTES_PATH").map(PathBuf::from),
        };

        let temperature: f32 = parse_or(&get, "LLM_TEMPERATURE", 0.1)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(QueryBotError::Config(format!(
                "LLM_TEMPERATURE must be within [0, 2], got {}",
                temperature
            )));
        }
        let max_tokens: u32 = parse_or(&get, "LLM_MAX_TOKENS", 300)?;
        if max_tokens == 0 {
            return Err(QueryBotError::Config("LLM_MAX_TOKENS must be positive".to_string()));
        }

        let ollama_model = get("OLLAMA_MODEL").unwrap_or_else(|| "tinyllama".to_string());
        let llm = LlmConfig {
            mode: parse_or(&get, "LLM_MODE", LlmMode::Auto)?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            openai_base_url,
            ollama_base_url: get("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_fallback_model: get("OLLAMA_FALLBACK_MODEL")
                .unwrap_or_else(|| "tinyllama".to_string()),
            ollama_model,
            use_gpu: parse_bool(&get, "USE_GPU", true)?,
            temperature,
            max_tokens,
            generation_timeout: Duration::from_secs(parse_or(&get, "GENERATION_TIMEOUT_SECS", 60)?),
            connectivity_timeout: Duration::from_secs(parse_or(&get, "CONNECTIVITY_TIMEOUT_SECS", 3)?),
        };

        Ok(Self {
            database_path: PathBuf::from(
                get("DATABASE_PATH").unwrap_or_else(|| "data/demo.sqlite".to_string()),
            ),
            allowed_tables,
            retrieval,
            llm,
            execution_timeout: Duration::from_secs(parse_or(&get, "EXECUTION_TIMEOUT_SECS", 10)?),
            max_sql_length: parse_or(&get, "MAX_SQL_LENGTH", 1000)?,
            summary_mode: parse_or(&get, "SUMMARY_MODE", SummaryMode::Llm)?,
            history_path: get("HISTORY_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| QueryBotError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(QueryBotError::Config(format!("{}={:?} is not a boolean", key, other))),
        },
    }
}
