//! Execution of validated SQL and answer summarisation.

pub mod classify;
pub mod executor;
pub mod summarizer;

pub use classify::{assess_complexity, classify_query_type, Complexity, QueryType};
pub use executor::{QueryOutput, SqlExecutor};
pub use summarizer::{AnswerSummarizer, Summary, SummaryMode};
