pub mod config;
pub mod entities;
pub mod error;
pub mod execution;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod response;
pub mod schema;
pub mod schema_rag;
pub mod security;

pub use config::Config;
pub use error::{QueryBotError, Result};
pub use history::{HistoryEntry, HistoryStats, QueryHistory};
pub use llm::{LlmGateway, LlmMode};
pub use orchestrator::{AskOptions, QueryOrchestrator};
pub use response::PipelineResponse;
pub use schema_rag::RetrievalFilter;
