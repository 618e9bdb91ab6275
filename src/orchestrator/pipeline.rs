//! Query Orchestrator
//!
//! retrieve -> generate -> validate -> [one repair] -> execute -> summarize.
//! Every expected failure (rejected SQL, unreachable model, execution
//! error) comes back as a `PipelineResponse`; only construction fails with
//! `Err`.

use crate::config::Config;
use crate::entities;
use crate::error::{QueryBotError, Result};
use crate::execution::{assess_complexity, classify_query_type, AnswerSummarizer, QueryType, SqlExecutor};
use crate::history::QueryHistory;
use crate::llm::{LlmGateway, LlmMode};
use crate::orchestrator::prompts::{build_prompt, build_repair_prompt, extract_sql, SQL_SYSTEM_PROMPT};
use crate::orchestrator::state::{step, Event, RepairState};
use crate::response::{DatabaseMeta, LlmMeta, PipelineResponse, ResponseMeta, ResultsMeta, ValidationMeta};
use crate::schema::{SchemaCatalog, SchemaNotes};
use crate::schema_rag::terms::TermMap;
use crate::schema_rag::{Embedder, HttpEmbedder, RetrievalFilter, RetrievalMode, SchemaRetriever};
use crate::security::{Allowlist, SqlValidator, ValidationResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

const EMPTY_QUESTION_ANSWER: &str = "Lütfen bir soru yazın.";
const BACKEND_FAILURE_ANSWER: &str =
    "Dil modeline şu anda ulaşılamıyor, bu yüzden sorgu oluşturulamadı. Lütfen daha sonra tekrar deneyin.";

/// Per-question overrides.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub mode: Option<LlmMode>,
    pub filter: RetrievalFilter,
}

pub struct QueryOrchestrator {
    retriever: SchemaRetriever,
    gateway: Arc<LlmGateway>,
    validator: SqlValidator,
    allowlist: Allowlist,
    executor: SqlExecutor,
    summarizer: AnswerSummarizer,
    history: Option<QueryHistory>,
    max_sql_length: usize,
}

impl QueryOrchestrator {
    pub fn new(
        retriever: SchemaRetriever,
        gateway: Arc<LlmGateway>,
        allowlist: Allowlist,
        executor: SqlExecutor,
        summarizer: AnswerSummarizer,
        max_sql_length: usize,
    ) -> Self {
        Self {
            retriever,
            gateway,
            validator: SqlValidator,
            allowlist,
            executor,
            summarizer,
            history: None,
            max_sql_length,
        }
    }

    pub fn with_history(mut self, history: QueryHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Wire every component from configuration. Fails only when the
    /// database or the configuration itself is unusable.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let executor = SqlExecutor::new(&config.database_path, config.execution_timeout)?;

        let notes = match config.retrieval.notes_path {
            Some(ref path) => SchemaNotes::load(path)?,
            None => SchemaNotes::builtin(),
        };
        let catalog = {
            let conn = executor.open()?;
            SchemaCatalog::load(&conn, &config.allowed_tables, &notes)?
        };
        info!("Loaded schema for {} tables", catalog.tables.len());

        let term_map = TermMap::builtin().with_extra(&notes.synonyms);
        let embedder: Option<Arc<dyn Embedder>> = match config.llm.openai_api_key {
            Some(ref key) if config.retrieval.mode == RetrievalMode::Hybrid && config.llm.hosted_configured() => {
                Some(Arc::new(HttpEmbedder::new(
                    key.clone(),
                    config.retrieval.embedding_base_url.clone(),
                    config.retrieval.embedding_model.clone(),
                    config.llm.generation_timeout,
                )?))
            }
            _ => None,
        };
        let mut retriever = SchemaRetriever::new(catalog, term_map, &config.retrieval, embedder);
        retriever.index().await;

        let gateway = Arc::new(LlmGateway::from_config(&config.llm)?);
        let summarizer = AnswerSummarizer::new(config.summary_mode, Some(Arc::clone(&gateway)));
        let allowlist = Allowlist::new(&config.allowed_tables);

        let mut orchestrator = Self::new(
            retriever,
            gateway,
            allowlist,
            executor,
            summarizer,
            config.max_sql_length,
        );
        if let Some(ref path) = config.history_path {
            match QueryHistory::open(path) {
                Ok(history) => orchestrator = orchestrator.with_history(history),
                Err(e) => warn!("Query history disabled: {}", e),
            }
        }
        Ok(orchestrator)
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        self.retriever.catalog()
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    pub fn history(&self) -> Option<&QueryHistory> {
        self.history.as_ref()
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub async fn answer(&self, question: &str) -> PipelineResponse {
        self.answer_with(question, &AskOptions::default()).await
    }

    pub async fn answer_with(&self, question: &str, options: &AskOptions) -> PipelineResponse {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let masked = entities::mask_pii(question.trim());
        let span = info_span!("question", trace_id = %trace_id);

        let response = self.run(&masked, options, trace_id).instrument(span).await;

        if let Some(ref history) = self.history {
            if let Err(e) = history.record(&masked, &response) {
                warn!("Failed to record query history: {}", e);
            }
        }
        response
    }

    async fn run(&self, question: &str, options: &AskOptions, trace_id: String) -> PipelineResponse {
        let started = Instant::now();
        let selected = options.mode.unwrap_or_else(|| self.gateway.mode());
        let mut meta = ResponseMeta::new(trace_id, selected);

        if question.is_empty() {
            return finish(String::new(), EMPTY_QUESTION_ANSWER.to_string(), meta, started);
        }
        info!("Question: {}", question);

        let snippets = self.retriever.retrieve(question, &options.filter).await;
        let found = entities::extract(question);
        let entity_block = entities::context_block(&found);
        let prompt = build_prompt(
            question,
            &snippets,
            &self.prompt_tables(),
            entity_block.as_deref(),
            self.max_sql_length,
        );
        meta.retrieval = snippets;

        let mut candidate = match self.generate_sql(&prompt, options.mode, &mut meta.llm).await {
            Ok(sql) => sql,
            Err(e) => return backend_failure(e, meta, started),
        };
        let mut validation = self.validator.validate(&candidate, &self.allowlist);
        let mut attempts = 1;
        let mut state = step(RepairState::Draft, Event::Checked { valid: validation.is_valid });

        while !state.is_terminal() {
            match state {
                RepairState::Invalid => {
                    warn!(
                        "Generated SQL rejected ({}), requesting one repair",
                        rule_list(&validation)
                    );
                    meta.retry_occurred = true;
                    let repair_prompt = build_repair_prompt(&prompt, &candidate, &validation);
                    candidate = match self.generate_sql(&repair_prompt, options.mode, &mut meta.llm).await {
                        Ok(sql) => sql,
                        Err(e) => {
                            meta.validation = ValidationMeta::from_result(&validation, attempts);
                            return backend_failure(e, meta, started);
                        }
                    };
                    state = step(state, Event::Regenerated);
                }
                s if s.awaits_validation() => {
                    validation = self.validator.validate(&candidate, &self.allowlist);
                    attempts += 1;
                    state = step(state, Event::Checked { valid: validation.is_valid });
                }
                _ => state = RepairState::Failed,
            }
        }
        meta.validation = ValidationMeta::from_result(&validation, attempts);

        if state == RepairState::Failed {
            warn!("Giving up after one repair: {}", rule_list(&validation));
            let answer = format!(
                "Oluşturulan sorgu güvenlik kurallarını karşılamadığı için çalıştırılmadı: {}",
                validation.errors().join("; ")
            );
            return finish(String::new(), answer, meta, started);
        }

        let sql = validation.normalized_sql.clone();
        meta.database = DatabaseMeta {
            tables_used: validation.tables.clone(),
            query_type: classify_query_type(&sql),
            complexity: assess_complexity(&sql),
        };

        let output = match self.executor.execute(&sql).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Validated SQL failed at execution: {}", e);
                meta.database.query_type = QueryType::Error;
                meta.error = Some(e.to_string());
                let answer = format!("Sorgu çalıştırılırken bir hata oluştu: {}", e);
                return finish(sql, answer, meta, started);
            }
        };
        meta.results = ResultsMeta::from_output(&output);
        meta.performance.execution_ms = output.execution_ms;

        let summary = self.summarizer.summarize(question, &output, options.mode).await;
        if let Some(ref generation) = summary.generation {
            meta.llm.tokens.add(&generation.token_usage);
        }
        info!(
            "Answered with {} rows ({:?}, retry: {})",
            output.row_count, meta.database.query_type, meta.retry_occurred
        );
        finish(sql, summary.text, meta, started)
    }

    /// Tables named in the prompt: allow-listed tables that exist, or the
    /// bare allow-list when the catalog is empty.
    fn prompt_tables(&self) -> Vec<String> {
        let names = self.retriever.catalog().table_names();
        if names.is_empty() {
            self.allowlist.names()
        } else {
            names
        }
    }

    /// One SQL generation call. Counts toward the two-call bound.
    async fn generate_sql(&self, prompt: &str, mode: Option<LlmMode>, llm: &mut LlmMeta) -> Result<String> {
        let mut request = self.gateway.request(prompt);
        request.system = Some(SQL_SYSTEM_PROMPT.to_string());
        request.mode = mode;

        llm.generation_calls += 1;
        let result = self.gateway.generate(&request).await?;
        llm.effective_mode = Some(result.backend_used);
        llm.model_used = Some(result.model.clone());
        llm.tokens.add(&result.token_usage);
        Ok(extract_sql(&result.text, self.max_sql_length))
    }
}

fn rule_list(validation: &ValidationResult) -> String {
    validation
        .violated_rules
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn backend_failure(err: QueryBotError, mut meta: ResponseMeta, started: Instant) -> PipelineResponse {
    warn!("SQL generation failed: {}", err);
    meta.error = Some(err.to_string());
    finish(String::new(), BACKEND_FAILURE_ANSWER.to_string(), meta, started)
}

fn finish(sql: String, answer: String, mut meta: ResponseMeta, started: Instant) -> PipelineResponse {
    meta.performance.total_ms = started.elapsed().as_millis() as u64;
    PipelineResponse { sql, answer, meta }
}
