//! In-memory table embedding index.

use std::collections::HashMap;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Table name (lower-case) -> embedding of its rendered description.
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    embeddings: HashMap<String, Embedding>,
    dimension: Option<usize>,
}

impl TableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an embedding; vectors of a different dimension than the first
    /// one are refused.
    pub fn insert(&mut self, table: &str, embedding: Embedding) -> bool {
        match self.dimension {
            Some(dimension) if dimension != embedding.len() => return false,
            None => self.dimension = Some(embedding.len()),
            _ => {}
        }
        self.embeddings.insert(table.to_lowercase(), embedding);
        true
    }

    /// Cosine similarity of the query against one table, clamped to [0, 1].
    pub fn similarity(&self, table: &str, query: &[f32]) -> Option<f32> {
        self.embeddings
            .get(&table.to_lowercase())
            .map(|e| cosine_similarity(query, e).max(0.0))
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
