use async_trait::async_trait;
use querybot::config::RetrievalConfig;
use querybot::error::{QueryBotError, Result};
use querybot::execution::{AnswerSummarizer, QueryType, SqlExecutor, SummaryMode};
use querybot::llm::{BackendKind, GenerationRequest, GenerationResult, LlmBackend, LlmGateway, LlmMode, TokenUsage};
use querybot::orchestrator::QueryOrchestrator;
use querybot::response::PipelineResponse;
use querybot::schema::{SchemaCatalog, SchemaNotes};
use querybot::schema_rag::terms::TermMap;
use querybot::schema_rag::{Embedder, RetrievalMode, SchemaRetriever};
use querybot::security::{Allowlist, Rule};
use querybot::QueryHistory;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ALLOWED: &[&str] = &["json_patients", "json_admissions", "json_providers"];

/// Local backend that replays canned answers and records every prompt.
struct ScriptedBackend {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    unavailable: bool,
}

impl ScriptedBackend {
    fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            unavailable: false,
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            unavailable: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> String {
        "scripted".to_string()
    }

    async fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.unavailable {
            return Err(QueryBotError::BackendUnavailable("connection refused".to_string()));
        }
        let text = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| QueryBotError::Llm("script exhausted".to_string()))?;
        Ok(GenerationResult {
            text,
            backend_used: BackendKind::Local,
            model: "scripted".to_string(),
            token_usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            latency_ms: 0,
        })
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(QueryBotError::Embedding("model failed to load".to_string()))
    }
}

fn seed_database() -> PathBuf {
    let path = std::env::temp_dir().join(format!("querybot-pipeline-{}.sqlite", uuid::Uuid::new_v4()));
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE json_patients (subject_id INTEGER PRIMARY KEY, gender TEXT, anchor_age INTEGER);
         CREATE TABLE json_admissions (hadm_id INTEGER PRIMARY KEY, subject_id INTEGER, admittime TEXT, race TEXT);
         CREATE TABLE json_providers (provider_id TEXT PRIMARY KEY);
         CREATE TABLE secrets (token TEXT);
         INSERT INTO json_patients VALUES (1, 'F', 52), (2, 'M', 67), (3, 'F', 41);
         INSERT INTO json_admissions VALUES (10, 1, '2180-05-06 22:23:00', 'WHITE'), (11, 2, '2180-06-01 10:00:00', 'ASIAN');
         INSERT INTO json_providers VALUES ('P001');
         INSERT INTO secrets VALUES ('s3cr3t');",
    )
    .unwrap();
    path
}

async fn orchestrator(
    db: &Path,
    backend: &Arc<ScriptedBackend>,
    mode: RetrievalMode,
    embedder: Option<Arc<dyn Embedder>>,
) -> QueryOrchestrator {
    let allowed: Vec<String> = ALLOWED.iter().map(|t| t.to_string()).collect();
    let catalog = {
        let conn = Connection::open(db).unwrap();
        SchemaCatalog::load(&conn, &allowed, &SchemaNotes::builtin()).unwrap()
    };
    let retrieval = RetrievalConfig {
        mode,
        top_k: 3,
        alpha: 0.6,
        embedding_model: "test-embedding".to_string(),
        embedding_base_url: "http://127.0.0.1:9".to_string(),
        notes_path: None,
    };
    let mut retriever = SchemaRetriever::new(catalog, TermMap::builtin(), &retrieval, embedder);
    retriever.index().await;

    let local: Arc<dyn LlmBackend> = backend.clone();
    let gateway = LlmGateway::new(LlmMode::Local, None, Some(local), Duration::from_secs(5));
    QueryOrchestrator::new(
        retriever,
        Arc::new(gateway),
        Allowlist::new(&allowed),
        SqlExecutor::new(db, Duration::from_secs(5)).unwrap(),
        AnswerSummarizer::new(SummaryMode::Template, None),
        1000,
    )
}

async fn ask(db: &Path, answers: &[&str], question: &str) -> (PipelineResponse, Arc<ScriptedBackend>) {
    let backend = ScriptedBackend::new(answers);
    let orchestrator = orchestrator(db, &backend, RetrievalMode::Keyword, None).await;
    let response = orchestrator.answer(question).await;
    (response, backend)
}

#[tokio::test]
async fn count_question_end_to_end() {
    let db = seed_database();
    let (response, backend) = ask(&db, &["SELECT COUNT(*) FROM json_patients"], "Kaç hasta var?").await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(response.meta.retrieval[0].table_name, "json_patients");
    assert!(backend.prompt(0).contains("json_patients"));
    assert_eq!(response.sql, "SELECT COUNT(*) FROM json_patients");
    assert_eq!(response.answer, "Toplam 3 kayıt bulundu.");
    assert!(response.meta.validation.is_valid);
    assert!(!response.meta.retry_occurred);
    assert_eq!(response.meta.database.query_type, QueryType::Count);
    assert_eq!(response.meta.database.tables_used, vec!["json_patients"]);
    assert_eq!(response.meta.results.row_count, 1);
    assert_eq!(response.meta.llm.effective_mode, Some(BackendKind::Local));
    assert!(response.is_success());

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["meta"]["database"]["query_type"], "COUNT_QUERY");
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn limit_without_order_by_gets_exactly_one_repair() {
    let db = seed_database();
    let (response, backend) = ask(
        &db,
        &[
            "SELECT * FROM json_patients LIMIT 5",
            "SELECT * FROM json_patients ORDER BY subject_id LIMIT 5",
        ],
        "İlk 5 hastayı göster",
    )
    .await;

    assert_eq!(backend.calls(), 2);
    let repair_prompt = backend.prompt(1);
    assert!(repair_prompt.contains("SELECT * FROM json_patients LIMIT 5"));
    assert!(repair_prompt.contains("[limit_without_order_by]"));

    assert!(response.meta.retry_occurred);
    assert!(response.meta.validation.is_valid);
    assert_eq!(response.meta.validation.attempts, 2);
    assert_eq!(response.meta.llm.generation_calls, 2);
    assert_eq!(response.meta.llm.tokens.total_tokens, 30);
    assert_eq!(response.meta.database.query_type, QueryType::Ordered);
    assert_eq!(response.meta.results.row_count, 3);
    assert_eq!(response.meta.results.sample_data.len(), 3);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn smuggled_drop_never_executes() {
    let db = seed_database();
    let smuggled = "SELECT COUNT(*) FROM json_patients; DROP TABLE json_patients;";
    let (response, backend) = ask(&db, &[smuggled, smuggled], "Kaç hasta var?").await;

    assert_eq!(backend.calls(), 2);
    assert!(response.sql.is_empty());
    assert!(!response.meta.validation.is_valid);
    assert!(response.meta.validation.violated_rules.contains(&Rule::MultipleStatements));
    assert!(response.meta.validation.violated_rules.contains(&Rule::ForbiddenKeyword));
    assert!(!response.is_success());

    let conn = Connection::open(&db).unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM json_patients", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 3);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn in_table_operand_is_not_executed() {
    let db = seed_database();
    let leak = "SELECT COUNT(*) FROM json_patients WHERE CAST(subject_id AS TEXT) IN secrets ORDER BY 1";
    let (response, backend) = ask(&db, &[leak, leak], "Kaç hasta var?").await;

    assert_eq!(backend.calls(), 2);
    assert!(response.sql.is_empty());
    assert!(!response.is_success());
    assert_eq!(response.meta.validation.violated_rules, vec![Rule::TableNotAllowed]);
    assert!(response.meta.validation.error[0].contains("secrets"));
    assert_eq!(response.meta.results.row_count, 0);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn statements_ahead_of_select_are_validated() {
    let db = seed_database();
    let (response, backend) = ask(
        &db,
        &[
            "DROP TABLE json_patients; SELECT COUNT(*) FROM json_patients",
            "DELETE FROM json_patients WHERE subject_id IN (SELECT subject_id FROM json_admissions)",
        ],
        "Kaç hasta var?",
    )
    .await;

    assert_eq!(backend.calls(), 2);
    assert!(response.sql.is_empty());
    assert!(response.meta.retry_occurred);
    let rules = &response.meta.validation.violated_rules;
    assert!(rules.contains(&Rule::NotSelect));
    assert!(rules.contains(&Rule::ForbiddenKeyword));
    assert!(response
        .meta
        .validation
        .normalized_sql
        .starts_with("DELETE FROM json_patients"));

    let conn = Connection::open(&db).unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM json_patients", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 3);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn prose_before_select_costs_no_repair() {
    let db = seed_database();
    let (response, backend) = ask(
        &db,
        &["Here is the query with a count: SELECT COUNT(*) FROM json_patients"],
        "Kaç hasta var?",
    )
    .await;

    assert_eq!(backend.calls(), 1);
    assert!(!response.meta.retry_occurred);
    assert_eq!(response.sql, "SELECT COUNT(*) FROM json_patients");
    assert_eq!(response.meta.validation.normalized_sql, response.sql);
    assert_eq!(response.answer, "Toplam 3 kayıt bulundu.");
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn gives_up_after_two_generations() {
    let db = seed_database();
    let (response, backend) = ask(
        &db,
        &["SELECT * FROM secrets", "SELECT token FROM secrets", "SELECT 1"],
        "Gizli tokenları göster",
    )
    .await;

    assert_eq!(backend.calls(), 2);
    assert!(response.sql.is_empty());
    assert!(!response.answer.is_empty());
    assert!(response.meta.retry_occurred);
    assert_eq!(response.meta.validation.violated_rules, vec![Rule::TableNotAllowed]);
    assert_eq!(response.meta.validation.attempts, 2);
    assert_eq!(response.meta.results.row_count, 0);
    assert_eq!(response.meta.database.query_type, QueryType::Unknown);
    assert!(response.meta.database.tables_used.is_empty());
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn unknown_table_repair_gets_suggestion() {
    let db = seed_database();
    let (response, backend) = ask(
        &db,
        &["SELECT gender FROM patients", "SELECT gender FROM json_patients"],
        "Hastaların cinsiyetleri",
    )
    .await;

    assert_eq!(backend.calls(), 2);
    assert!(backend.prompt(1).contains("did you mean json_patients?"));
    assert!(response.meta.validation.is_valid);
    for table in &response.meta.database.tables_used {
        assert!(ALLOWED.contains(&table.as_str()));
    }
    assert_eq!(response.meta.results.row_count, 3);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn embedding_failure_falls_back_to_keywords() {
    let db = seed_database();
    let backend = ScriptedBackend::new(&["SELECT COUNT(*) FROM json_admissions"]);
    let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder);
    let orchestrator = orchestrator(&db, &backend, RetrievalMode::Hybrid, Some(embedder)).await;

    let response = orchestrator.answer("Kaç yatış var?").await;
    assert!(!response.meta.retrieval.is_empty());
    assert_eq!(response.meta.retrieval[0].table_name, "json_admissions");
    assert!(response.meta.retrieval.iter().all(|s| s.semantic_score.is_none()));
    assert_eq!(response.answer, "Toplam 2 kayıt bulundu.");
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn execution_error_becomes_error_response() {
    let db = seed_database();
    let (response, backend) = ask(&db, &["SELECT no_such_column FROM json_patients"], "Hasta bilgisi").await;

    assert_eq!(backend.calls(), 1);
    assert!(response.meta.validation.is_valid);
    assert_eq!(response.meta.database.query_type, QueryType::Error);
    assert!(response.meta.error.is_some());
    assert_eq!(response.meta.results.row_count, 0);
    assert!(!response.is_success());
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn unreachable_backend_returns_well_formed_failure() {
    let db = seed_database();
    let backend = ScriptedBackend::unreachable();
    let orchestrator = orchestrator(&db, &backend, RetrievalMode::Keyword, None).await;

    let response = orchestrator.answer("Kaç hasta var?").await;
    assert_eq!(backend.calls(), 1);
    assert!(response.sql.is_empty());
    assert!(response.meta.error.as_deref().unwrap_or_default().contains("unavailable"));
    assert!(!response.meta.retry_occurred);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn empty_question_skips_the_model() {
    let db = seed_database();
    let (response, backend) = ask(&db, &["SELECT 1"], "   ").await;
    assert_eq!(backend.calls(), 0);
    assert!(response.sql.is_empty());
    assert!(!response.answer.is_empty());
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn contact_details_are_masked_before_prompting() {
    let db = seed_database();
    let (_, backend) = ask(
        &db,
        &["SELECT COUNT(*) FROM json_patients"],
        "Kaç hasta var? Sonucu ali.veli@example.com adresine yaz",
    )
    .await;
    let prompt = backend.prompt(0);
    assert!(!prompt.contains("ali.veli@example.com"));
    assert!(prompt.contains("[EMAIL]"));
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn same_question_same_answer() {
    let db = seed_database();
    let script = ["SELECT gender, COUNT(*) AS n FROM json_patients GROUP BY gender ORDER BY gender"];
    let (first, _) = ask(&db, &script, "Cinsiyet dağılımı").await;
    let (second, _) = ask(&db, &script, "Cinsiyet dağılımı").await;

    assert_eq!(first.sql, second.sql);
    assert_eq!(first.answer, second.answer);
    assert_eq!(first.meta.validation, second.meta.validation);
    assert_eq!(first.meta.database, second.meta.database);
    assert_eq!(first.meta.retrieval, second.meta.retrieval);
    assert_ne!(first.meta.trace_id, second.meta.trace_id);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn response_survives_json_round_trip() {
    let db = seed_database();
    let (response, _) = ask(
        &db,
        &["SELECT gender, COUNT(*) AS n FROM json_patients GROUP BY gender ORDER BY gender"],
        "Cinsiyet dağılımı",
    )
    .await;
    assert_eq!(response.meta.database.query_type, QueryType::GroupBy);

    let json = serde_json::to_string(&response).unwrap();
    let parsed: PipelineResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, response);
    std::fs::remove_file(db).ok();
}

#[tokio::test]
async fn answers_are_recorded_in_history() {
    let db = seed_database();
    let history_path = std::env::temp_dir().join(format!("querybot-history-{}.sqlite", uuid::Uuid::new_v4()));
    let backend = ScriptedBackend::new(&["SELECT COUNT(*) FROM json_patients"]);
    let orchestrator = orchestrator(&db, &backend, RetrievalMode::Keyword, None)
        .await
        .with_history(QueryHistory::open(&history_path).unwrap());

    let response = orchestrator.answer("Kaç hasta var?").await;
    let history = orchestrator.history().unwrap();
    let entries = history.recent(5).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].trace_id, response.meta.trace_id);
    assert!(entries[0].success);
    assert_eq!(history.stats().unwrap().successes, 1);

    std::fs::remove_file(db).ok();
    std::fs::remove_file(history_path).ok();
}
