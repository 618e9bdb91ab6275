//! Schema RAG Retriever
//!
//! Retrieves relevant schema snippets using keyword overlap and, when
//! available, embedding similarity.

use crate::config::RetrievalConfig;
use crate::schema::SchemaCatalog;
use crate::schema_rag::embedder::{table_to_text, Embedder};
use crate::schema_rag::terms::{keyword_score, TableTerms, TermMap};
use crate::schema_rag::vector_store::TableIndex;
use crate::schema_rag::{RetrievalFilter, RetrievalMode, SchemaSnippet};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Schema RAG retriever
pub struct SchemaRetriever {
    catalog: SchemaCatalog,
    table_terms: Vec<TableTerms>,
    term_map: TermMap,
    mode: RetrievalMode,
    top_k: usize,
    alpha: f32,
    embedder: Option<Arc<dyn Embedder>>,
    index: TableIndex,
}

impl SchemaRetriever {
    pub fn new(
        catalog: SchemaCatalog,
        term_map: TermMap,
        config: &RetrievalConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let table_terms = catalog.tables.iter().map(TableTerms::from_table).collect();
        Self {
            catalog,
            table_terms,
            term_map,
            mode: config.mode,
            top_k: config.top_k.max(1),
            alpha: config.alpha.clamp(0.0, 1.0),
            embedder,
            index: TableIndex::new(),
        }
    }

    /// Embed every table description. Any failure leaves the retriever in
    /// keyword-only mode rather than failing construction.
    pub async fn index(&mut self) {
        if self.mode != RetrievalMode::Hybrid {
            return;
        }
        let embedder = match self.embedder {
            Some(ref e) => Arc::clone(e),
            None => {
                info!("No embedder configured, schema retrieval is keyword-only");
                return;
            }
        };

        let mut index = TableIndex::new();
        for table in &self.catalog.tables {
            match embedder.embed(&table_to_text(table)).await {
                Ok(embedding) => {
                    if !index.insert(&table.name, embedding) {
                        warn!(
                            "Retrieval degraded: embedding for '{}' has an unexpected dimension",
                            table.name
                        );
                        return;
                    }
                }
                Err(e) => {
                    warn!("Retrieval degraded to keyword-only, embedding backend failed: {}", e);
                    return;
                }
            }
        }
        info!("Indexed {} table embeddings", index.len());
        self.index = index;
    }

    /// Whether dense similarity currently takes part in scoring.
    pub fn is_hybrid(&self) -> bool {
        self.mode == RetrievalMode::Hybrid && self.embedder.is_some() && !self.index.is_empty()
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Rank tables against the question; at most `top_k` snippets, best first,
    /// ties in declaration order.
    pub async fn retrieve(&self, question: &str, filter: &RetrievalFilter) -> Vec<SchemaSnippet> {
        let concepts = self.term_map.concepts(question);
        let query_embedding = self.embed_question(question).await;

        let mut snippets: Vec<SchemaSnippet> = self
            .catalog
            .tables
            .iter()
            .zip(&self.table_terms)
            .filter(|(table, _)| filter.admits(&table.name))
            .map(|(table, terms)| {
                let (keyword, match_reasons) = keyword_score(&concepts, terms);
                let semantic = query_embedding
                    .as_ref()
                    .and_then(|q| self.index.similarity(&table.name, q));
                let relevance_score = match semantic {
                    Some(s) => self.alpha * s + (1.0 - self.alpha) * keyword,
                    None => keyword,
                };
                SchemaSnippet {
                    table_name: table.name.clone(),
                    rendered_description: table.render(),
                    relevance_score,
                    keyword_score: keyword,
                    semantic_score: semantic,
                    match_reasons,
                }
            })
            .collect();

        // sort_by is stable: equal scores keep declaration order
        snippets.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });
        snippets.truncate(self.top_k);

        debug!(
            "Retrieved {:?} for question with {} concepts",
            snippets.iter().map(|s| (&s.table_name, s.relevance_score)).collect::<Vec<_>>(),
            concepts.len()
        );
        snippets
    }

    async fn embed_question(&self, question: &str) -> Option<Vec<f32>> {
        if !self.is_hybrid() {
            return None;
        }
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(question).await {
            Ok(embedding) if Some(embedding.len()) == self.index.dimension() => Some(embedding),
            Ok(_) => {
                warn!("Retrieval degraded: question embedding dimension mismatch");
                None
            }
            Err(e) => {
                warn!("Retrieval degraded to keyword-only for this question: {}", e);
                None
            }
        }
    }
}
