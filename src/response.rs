//! Pipeline Response - the JSON contract returned to the CLI and other callers

use crate::execution::{Complexity, QueryOutput, QueryType};
use crate::llm::{BackendKind, LlmMode, TokenUsage};
use crate::schema_rag::SchemaSnippet;
use crate::security::{Rule, ValidationResult};
use serde::{Deserialize, Serialize};

/// Rows copied into `meta.results.sample_data`.
pub const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Executed SQL; empty when nothing passed validation.
    pub sql: String,
    pub answer: String,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub trace_id: String,
    pub results: ResultsMeta,
    pub validation: ValidationMeta,
    pub database: DatabaseMeta,
    pub performance: PerformanceMeta,
    pub retrieval: Vec<SchemaSnippet>,
    pub llm: LlmMeta,
    pub retry_occurred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsMeta {
    pub row_count: usize,
    pub columns: Vec<String>,
    pub sample_data: Vec<Vec<serde_json::Value>>,
}

impl ResultsMeta {
    pub fn from_output(output: &QueryOutput) -> Self {
        Self {
            row_count: output.row_count,
            columns: output.columns.clone(),
            sample_data: output.rows.iter().take(SAMPLE_ROWS).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMeta {
    pub is_valid: bool,
    pub violated_rules: Vec<Rule>,
    pub error: Vec<String>,
    /// What the validator checked and, when valid, what was executed.
    #[serde(default)]
    pub normalized_sql: String,
    /// Validator runs for this question (1 or 2).
    pub attempts: u32,
}

impl ValidationMeta {
    pub fn from_result(result: &ValidationResult, attempts: u32) -> Self {
        Self {
            is_valid: result.is_valid,
            violated_rules: result.violated_rules.clone(),
            error: result.errors(),
            normalized_sql: result.normalized_sql.clone(),
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub tables_used: Vec<String>,
    pub query_type: QueryType,
    pub complexity: Complexity,
}

impl Default for DatabaseMeta {
    fn default() -> Self {
        Self {
            tables_used: Vec::new(),
            query_type: QueryType::Unknown,
            complexity: Complexity::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMeta {
    pub execution_ms: u64,
    /// Wall clock for the whole question.
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMeta {
    pub selected_mode: LlmMode,
    pub effective_mode: Option<BackendKind>,
    pub model_used: Option<String>,
    pub tokens: TokenUsage,
    /// SQL generation calls made for this question.
    pub generation_calls: u32,
}

impl LlmMeta {
    pub fn new(selected_mode: LlmMode) -> Self {
        Self {
            selected_mode,
            effective_mode: None,
            model_used: None,
            tokens: TokenUsage::default(),
            generation_calls: 0,
        }
    }
}

impl ResponseMeta {
    pub fn new(trace_id: impl Into<String>, selected_mode: LlmMode) -> Self {
        Self {
            trace_id: trace_id.into(),
            results: ResultsMeta::default(),
            validation: ValidationMeta::default(),
            database: DatabaseMeta::default(),
            performance: PerformanceMeta::default(),
            retrieval: Vec::new(),
            llm: LlmMeta::new(selected_mode),
            retry_occurred: false,
            error: None,
        }
    }
}

impl PipelineResponse {
    /// Validated SQL ran without error.
    pub fn is_success(&self) -> bool {
        !self.sql.is_empty() && self.meta.error.is_none() && self.meta.database.query_type != QueryType::Error
    }

    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_wire_shape() {
        let mut meta = ResponseMeta::new("trace-1", LlmMode::Auto);
        meta.database.query_type = QueryType::Count;
        meta.database.complexity = Complexity::Simple;
        meta.validation.is_valid = true;
        let response = PipelineResponse {
            sql: "SELECT COUNT(*) FROM json_patients".to_string(),
            answer: "Toplam 3 kayıt bulundu.".to_string(),
            meta,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["meta"]["database"]["query_type"], json!("COUNT_QUERY"));
        assert_eq!(value["meta"]["database"]["complexity"], json!("SIMPLE"));
        assert_eq!(value["meta"]["llm"]["selected_mode"], json!("auto"));
        assert_eq!(value["meta"]["retry_occurred"], json!(false));
        assert!(value["meta"].get("error").is_none());
        assert!(response.is_success());
    }

    #[test]
    fn failed_validation_is_not_success() {
        let mut meta = ResponseMeta::new("trace-2", LlmMode::Local);
        meta.validation.violated_rules = vec![Rule::LimitWithoutOrderBy];
        let response = PipelineResponse {
            sql: String::new(),
            answer: "x".to_string(),
            meta,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["meta"]["validation"]["violated_rules"], json!(["limit_without_order_by"]));
        assert!(!response.is_success());
    }

    #[test]
    fn validation_meta_carries_normalized_sql() {
        let allowlist = crate::security::Allowlist::new(["json_patients"]);
        let result = crate::security::SqlValidator.validate("  SELECT gender FROM json_patients ;", &allowlist);
        let validation = ValidationMeta::from_result(&result, 1);
        assert!(validation.is_valid);
        assert_eq!(validation.normalized_sql, "SELECT gender FROM json_patients");

        let value = serde_json::to_value(&validation).unwrap();
        assert_eq!(value["normalized_sql"], json!("SELECT gender FROM json_patients"));
    }

    #[test]
    fn samples_first_rows() {
        let output = QueryOutput {
            columns: vec!["n".to_string()],
            rows: (0..5).map(|i| vec![json!(i)]).collect(),
            row_count: 5,
            execution_ms: 2,
        };
        let results = ResultsMeta::from_output(&output);
        assert_eq!(results.row_count, 5);
        assert_eq!(results.sample_data.len(), SAMPLE_ROWS);
    }
}
