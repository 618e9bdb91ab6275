//! Answer summarisation.
//!
//! Recognised result shapes (no rows, a single COUNT, a single value) get a
//! deterministic answer. Anything else goes to the model in `Llm` mode, or
//! gets a generic row listing in `Template` mode or when the model fails.

use crate::execution::executor::QueryOutput;
use crate::llm::{GenerationResult, LlmGateway, LlmMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

pub const NO_ROWS_ANSWER: &str = "Bu soru için veritabanında kayıt bulunamadı.";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a medical database expert. You explain query \
results to hospital staff in the language of their question, using only the data provided.";

/// Rows shown to the model.
const SUMMARY_ROW_LIMIT: usize = 10;
/// Rows listed in the generic template answer.
const TEMPLATE_ROW_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Llm,
    Template,
}

impl FromStr for SummaryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" => Ok(SummaryMode::Llm),
            "template" => Ok(SummaryMode::Template),
            other => Err(format!("unknown summary mode '{}'", other)),
        }
    }
}

impl fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryMode::Llm => write!(f, "llm"),
            SummaryMode::Template => write!(f, "template"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    /// Present when the model wrote the answer.
    pub generation: Option<GenerationResult>,
}

impl Summary {
    fn template(text: String) -> Self {
        Self { text, generation: None }
    }
}

pub struct AnswerSummarizer {
    mode: SummaryMode,
    gateway: Option<Arc<LlmGateway>>,
}

impl AnswerSummarizer {
    pub fn new(mode: SummaryMode, gateway: Option<Arc<LlmGateway>>) -> Self {
        Self { mode, gateway }
    }

    pub fn mode(&self) -> SummaryMode {
        self.mode
    }

    pub async fn summarize(&self, question: &str, output: &QueryOutput, llm_mode: Option<LlmMode>) -> Summary {
        if let Some(text) = template_answer(output) {
            return Summary::template(text);
        }
        let gateway = match (self.mode, &self.gateway) {
            (SummaryMode::Llm, Some(gateway)) => gateway,
            _ => return Summary::template(generic_answer(output)),
        };

        let mut request = gateway.request(summary_prompt(question, output));
        request.system = Some(SUMMARY_SYSTEM_PROMPT.to_string());
        request.mode = llm_mode;
        match gateway.generate(&request).await {
            Ok(result) if !result.text.trim().is_empty() => Summary {
                text: result.text.trim().to_string(),
                generation: Some(result),
            },
            Ok(_) => {
                warn!("Summary model returned no text, using template answer");
                Summary::template(generic_answer(output))
            }
            Err(e) => {
                warn!("Summary generation failed, using template answer: {}", e);
                Summary::template(generic_answer(output))
            }
        }
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Deterministic answers for recognised shapes.
pub fn template_answer(output: &QueryOutput) -> Option<String> {
    if output.row_count == 0 {
        return Some(NO_ROWS_ANSWER.to_string());
    }
    if output.row_count != 1 || output.columns.len() != 1 {
        return None;
    }
    let value = output.rows.first().and_then(|r| r.first())?;
    let column = output.columns[0].to_lowercase();
    if column.contains("count") && (value.is_i64() || value.is_u64()) {
        return Some(format!("Toplam {} kayıt bulundu.", render_value(value)));
    }
    Some(format!("Sonuç: {}", render_value(value)))
}

/// Row count plus the first few rows as `column=value` pairs.
pub fn generic_answer(output: &QueryOutput) -> String {
    if output.row_count == 0 {
        return NO_ROWS_ANSWER.to_string();
    }
    let lines: Vec<String> = output
        .rows
        .iter()
        .take(TEMPLATE_ROW_LIMIT)
        .map(|row| {
            output
                .columns
                .iter()
                .zip(row)
                .map(|(c, v)| format!("{}={}", c, render_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();
    format!("{} kayıt bulundu. İlk sonuçlar:\n- {}", output.row_count, lines.join("\n- "))
}

fn summary_prompt(question: &str, output: &QueryOutput) -> String {
    let records: Vec<String> = output
        .rows
        .iter()
        .take(SUMMARY_ROW_LIMIT)
        .enumerate()
        .map(|(i, row)| {
            let fields: Vec<String> = output
                .columns
                .iter()
                .zip(row)
                .map(|(c, v)| format!("{}: {}", c, render_value(v)))
                .collect();
            format!("Record {}: {}", i + 1, fields.join(", "))
        })
        .collect();
    format!(
        "User Question: {}\n\nDatabase Results:\n{}\n\nTotal {} records found.\n\n\
         Give a direct answer to the question followed by the important numbers.\n\nAnswer:",
        question,
        records.join("\n"),
        output.row_count
    )
}
