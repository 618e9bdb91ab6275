//! Schema Embedder
//!
//! Dense embeddings for questions and table descriptions through an
//! OpenAI-compatible `/embeddings` endpoint.

use crate::error::{QueryBotError, Result};
use crate::schema::TableSchema;
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Text a table is embedded as.
pub fn table_to_text(table: &TableSchema) -> String {
    let mut parts = vec![format!("Table: {}", table.name)];
    if let Some(ref description) = table.description {
        parts.push(format!("Description: {}", description));
    }
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| match c.description {
            Some(ref d) => format!("{} ({})", c.name, d),
            None => c.name.clone(),
        })
        .collect();
    if !columns.is_empty() {
        parts.push(format!("Columns: {}", columns.join(", ")));
    }
    parts.join(". ")
}

/// Embedding client using the OpenAI API
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryBotError::Embedding(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryBotError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(QueryBotError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryBotError::Embedding(format!("Failed to parse embedding response: {}", e)))?;
        parse_embedding(&response_json)
    }
}

fn parse_embedding(response_json: &serde_json::Value) -> Result<Embedding> {
    let data = response_json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| QueryBotError::Embedding("No embedding data in response".to_string()))?;

    let embedding: Embedding = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| QueryBotError::Embedding("No embedding vector in response".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if embedding.is_empty() {
        return Err(QueryBotError::Embedding("Empty embedding vector".to_string()));
    }
    Ok(embedding)
}
