//! Domain entity extraction for prompt grounding.
//!
//! Pulls medical domain terms, explicit identifiers (`subject_id = 123`) and
//! time fields out of a question, and masks contact details before the
//! question leaves the process.

use crate::schema_rag::terms::fold;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

const DOMAIN_KEYWORDS: &[&str] = &[
    // English
    "patient", "hospital", "admission", "discharge", "doctor", "provider", "diagnosis", "disease",
    "subject_id", "hadm_id", "provider_id", "transfer", "careunit", "insurance", "age", "gender",
    "admittime", "dischtime",
    // Turkish, folded
    "hasta", "hastane", "yatis", "cikis", "doktor", "personel", "tani", "hastalik",
];

lazy_static! {
    static ref ID_RE: Regex =
        Regex::new(r"(?i)\b(subject_id|hadm_id|provider_id)\b\s*[:=#-]?\s*([A-Za-z0-9_-]{1,64})").unwrap();
    static ref TIME_RE: Regex =
        Regex::new(r"(?i)\b(admittime|dischtime)\b\s*[:=#-]?\s*([0-9][0-9T:/ -]{4,24})").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"(?i)\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap();
    static ref PHONE_RE: Regex = Regex::new(
        r"\+\d{1,3}[\s-]?\(?\d{2,4}\)?[\s-]?\d{3}[\s-]?\d{2,4}[\s-]?\d{2,4}|\(?\b\d{3,4}\)?[\s-]\d{3}[\s-]\d{2}[\s-]?\d{2}\b"
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    /// `DOMAIN_TERM`, or the upper-cased identifier/time column.
    pub label: String,
    pub value: String,
}

impl Entity {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    pub fn is_domain_term(&self) -> bool {
        self.label == "DOMAIN_TERM"
    }
}

/// Domain terms first (sorted, distinct), then identifiers and times in
/// order of appearance.
pub fn extract(text: &str) -> Vec<Entity> {
    let folded = fold(text);
    let tokens: Vec<&str> = folded
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();

    let mut terms: Vec<&str> = DOMAIN_KEYWORDS
        .iter()
        .copied()
        .filter(|k| tokens.iter().any(|t| t.starts_with(k)))
        .collect();
    terms.sort_unstable();

    let mut entities: Vec<Entity> = terms.into_iter().map(|t| Entity::new("DOMAIN_TERM", t)).collect();
    for caps in ID_RE.captures_iter(text) {
        entities.push(Entity::new(caps[1].to_uppercase(), &caps[2]));
    }
    for caps in TIME_RE.captures_iter(text) {
        entities.push(Entity::new(caps[1].to_uppercase(), caps[2].trim()));
    }
    entities
}

/// Prompt block for extracted entities; `None` when nothing was found.
pub fn context_block(entities: &[Entity]) -> Option<String> {
    if entities.is_empty() {
        return None;
    }

    let terms: Vec<&str> = entities
        .iter()
        .filter(|e| e.is_domain_term())
        .map(|e| e.value.as_str())
        .collect();
    let ids: Vec<String> = entities
        .iter()
        .filter(|e| !e.is_domain_term())
        .map(|e| format!("- {}: {}", e.label, e.value))
        .collect();

    let mut blocks = Vec::new();
    if !terms.is_empty() {
        blocks.push(format!("Domain terms: {}", terms.join(", ")));
    }
    if !ids.is_empty() {
        blocks.push(format!("Identifiers/Times:\n{}", ids.join("\n")));
    }
    Some(blocks.join("\n\n"))
}

/// Replace e-mail addresses and phone numbers with placeholders.
pub fn mask_pii(text: &str) -> String {
    let masked = EMAIL_RE.replace_all(text, "[EMAIL]");
    PHONE_RE.replace_all(&masked, "[PHONE]").into_owned()
}
