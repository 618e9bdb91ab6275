//! Prompt construction and SQL extraction from model output.

use crate::schema_rag::SchemaSnippet;
use crate::security::sql_validator::FORBIDDEN_KEYWORDS;
use crate::security::{Rule, ValidationResult};
use lazy_static::lazy_static;
use regex::Regex;

pub const SQL_SYSTEM_PROMPT: &str = "You are a medical database SQL expert working on SQLite. \
Translate the user's question into exactly one read-only SQL query. \
Return only the SQL, without explanations or Markdown.";

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)(?:```|$)").unwrap();
    static ref PREFIX_RE: Regex = Regex::new(r"(?i)^\s*(?:sql\s*query|sql)\s*:\s*").unwrap();
    static ref START_RE: Regex =
        Regex::new(r"(?i)\bSELECT\b|\bWITH\s+(?:RECURSIVE\s+)?\w+\s+AS\s*\(").unwrap();
    static ref STATEMENT_WORD_RE: Regex =
        Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap();
}

/// Text around the SQL that can be dropped: no statement separator and no
/// write or DDL keyword.
fn is_prose(text: &str) -> bool {
    !text.contains(';') && !STATEMENT_WORD_RE.is_match(text)
}

/// Grounded first-attempt prompt.
pub fn build_prompt(
    question: &str,
    snippets: &[SchemaSnippet],
    allowed_tables: &[String],
    entities: Option<&str>,
    max_sql_length: usize,
) -> String {
    let schema = if snippets.is_empty() {
        "(no matching tables)".to_string()
    } else {
        snippets
            .iter()
            .map(|s| s.rendered_description.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let mut prompt = format!(
        "Database Schema Information:\n{}\n\nAllowed tables: {}\n",
        schema,
        allowed_tables.join(", ")
    );
    if let Some(entities) = entities {
        prompt.push_str(&format!("\nExtracted entities:\n{}\n", entities));
    }
    prompt.push_str(&format!(
        "\nRules:\n\
         - Write a single SQLite SELECT statement\n\
         - Use only the allowed tables and the columns listed above\n\
         - Never modify data or schema\n\
         - Use ORDER BY whenever you use LIMIT\n\
         - Use JOINs on the documented id columns when more than one table is needed\n\
         - Maximum SQL length: {} characters\n\
         \nQuestion: {}\n\nSQL:",
        max_sql_length, question
    ));
    prompt
}

fn rule_guidance(rule: Rule, validation: &ValidationResult) -> String {
    match rule {
        Rule::Empty => "The answer contained no SQL. Return one SELECT statement.".to_string(),
        Rule::MultipleStatements => {
            "Return exactly one statement, with no semicolon-separated second statement.".to_string()
        }
        Rule::NotSelect => "The statement must start with SELECT (no WITH, PRAGMA or DML).".to_string(),
        Rule::ForbiddenKeyword => format!(
            "Remove the forbidden keyword(s) {}; only read data.",
            validation.forbidden_keywords.join(", ").to_uppercase()
        ),
        Rule::TableNotAllowed => {
            let tables: Vec<String> = validation
                .blocked_tables
                .iter()
                .map(|t| match validation.suggestions.get(t) {
                    Some(s) => format!("{} (did you mean {}?)", t, s),
                    None => t.clone(),
                })
                .collect();
            format!("These tables are not allowed: {}. Use only the allowed tables.", tables.join(", "))
        }
        Rule::LimitWithoutOrderBy => "Add an ORDER BY clause, LIMIT is only allowed together with ORDER BY.".to_string(),
    }
}

/// Second-attempt prompt: the original prompt, the rejected SQL and one
/// instruction per violated rule.
pub fn build_repair_prompt(original_prompt: &str, rejected_sql: &str, validation: &ValidationResult) -> String {
    let rules: Vec<String> = validation
        .violated_rules
        .iter()
        .map(|r| format!("- [{}] {}", r, rule_guidance(*r, validation)))
        .collect();
    format!(
        "{}\n\nYour previous answer was rejected:\n{}\n\nViolations:\n{}\n\n\
         Correct only these violations and keep the rest of the query. Return only the corrected SQL.\n\nSQL:",
        original_prompt,
        rejected_sql,
        rules.join("\n")
    )
}

/// Pull the SQL out of a model answer. Extra statements are kept so the
/// validator sees them.
pub fn extract_sql(raw: &str, max_length: usize) -> String {
    let mut text = raw.trim().to_string();

    if text.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(sql) = value.get("sql").and_then(|s| s.as_str()) {
                text = sql.trim().to_string();
            }
        }
    }

    if let Some(caps) = FENCE_RE.captures(&text) {
        if let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) {
            if is_prose(&text[..whole.start()]) && is_prose(&text[whole.end()..]) {
                text = body.as_str().trim().to_string();
            }
        }
    }
    text = PREFIX_RE.replace(&text, "").trim().to_string();

    // Anything that looks like SQL ahead of the first SELECT stays, so the
    // validator sees it.
    if let Some(start) = START_RE.find(&text) {
        if is_prose(&text[..start.start()]) {
            text = text[start.start()..].to_string();
        }
    }

    if text.chars().count() > max_length {
        text = text.chars().take(max_length).collect();
    }
    text.trim().to_string()
}
