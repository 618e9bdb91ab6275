//! Table allow-list with near-miss suggestions.

use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};
use strsim::jaro_winkler;

/// Jaro-Winkler similarity above which a table name counts as a typo.
const SUGGESTION_THRESHOLD: f64 = 0.8;

lazy_static! {
    /// Names models commonly invent for the medical tables.
    static ref COMMON_ALIASES: HashMap<&'static str, &'static str> = [
        ("patient", "json_patients"),
        ("patients", "json_patients"),
        ("hasta", "json_patients"),
        ("hastalar", "json_patients"),
        ("admission", "json_admissions"),
        ("admissions", "json_admissions"),
        ("yatis", "json_admissions"),
        ("provider", "json_providers"),
        ("providers", "json_providers"),
        ("doctor", "json_providers"),
        ("doctors", "json_providers"),
        ("transfer", "json_transfers"),
        ("transfers", "json_transfers"),
        ("lab", "json_lab"),
        ("labs", "json_lab"),
        ("lab_results", "json_lab"),
        ("diagnosis", "json_diagnoses"),
        ("diagnoses", "json_diagnoses"),
        ("insurance", "json_insurance"),
        ("careunit", "json_careunits"),
        ("careunits", "json_careunits"),
        ("care_units", "json_careunits"),
    ]
    .into_iter()
    .collect();
}

/// Lower-cased set of table names generated SQL may reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allowlist {
    tables: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(&table.to_lowercase())
    }

    /// Sorted table names.
    pub fn names(&self) -> Vec<String> {
        self.tables.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Closest allowed table for an unknown name. Only used to guide a
    /// repair; never makes the unknown name valid.
    pub fn suggest(&self, unknown: &str) -> Option<String> {
        let name = unknown.trim().to_lowercase();
        if self.tables.contains(&name) {
            return None;
        }

        let prefixed = format!("json_{}", name);
        if self.tables.contains(&prefixed) {
            return Some(prefixed);
        }
        if let Some(target) = COMMON_ALIASES.get(name.as_str()) {
            if self.tables.contains(*target) {
                return Some(target.to_string());
            }
        }

        self.tables
            .iter()
            .map(|t| (t, jaro_winkler(&name, t)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| t.clone())
    }
}
