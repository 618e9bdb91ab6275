use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryBotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("History error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueryBotError {
    fn from(err: rusqlite::Error) -> Self {
        QueryBotError::Database(err.to_string())
    }
}

impl QueryBotError {
    /// Errors after which Auto mode may retry the call on the other backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            QueryBotError::BackendUnavailable(_) | QueryBotError::GenerationTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueryBotError>;
