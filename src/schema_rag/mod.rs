//! Schema RAG
//!
//! Ranks allow-listed tables against a question and renders them as prompt
//! snippets. Keyword overlap always contributes; dense similarity joins in
//! when an embedder is configured and reachable.

pub mod embedder;
pub mod retriever;
pub mod terms;
pub mod vector_store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use embedder::{Embedder, HttpEmbedder};
pub use retriever::SchemaRetriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Keyword and embedding scores combined with `alpha`.
    Hybrid,
    Keyword,
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hybrid" | "dense" => Ok(RetrievalMode::Hybrid),
            "keyword" | "bm25" => Ok(RetrievalMode::Keyword),
            other => Err(format!("unknown retrieval mode '{}'", other)),
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Hybrid => write!(f, "hybrid"),
            RetrievalMode::Keyword => write!(f, "keyword"),
        }
    }
}

/// One ranked table description handed to the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnippet {
    pub table_name: String,
    pub rendered_description: String,
    pub relevance_score: f32,
    pub keyword_score: f32,
    /// Absent when retrieval ran keyword-only.
    pub semantic_score: Option<f32>,
    pub match_reasons: BTreeSet<String>,
}

/// Restricts candidates before scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalFilter {
    pub table: Option<String>,
}

impl RetrievalFilter {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: Some(name.into()),
        }
    }

    pub fn admits(&self, table_name: &str) -> bool {
        self.table
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(table_name))
            .unwrap_or(true)
    }
}
