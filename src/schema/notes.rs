//! Schema notes: human descriptions of tables/columns and extra synonyms.

use crate::error::{QueryBotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableNote {
    #[serde(default)]
    pub description: Option<String>,
    /// Column name (lower-case) -> description.
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaNotes {
    #[serde(default)]
    pub tables: HashMap<String, TableNote>,
    /// Source-language term -> target-language schema terms.
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
}

impl SchemaNotes {
    /// Load notes from a JSON file, layered on top of the built-in notes.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QueryBotError::Config(format!("Cannot read schema notes {}: {}", path.display(), e))
        })?;
        let file: SchemaNotes = serde_json::from_str(&raw)?;
        let mut notes = Self::builtin();
        notes.merge(file);
        Ok(notes)
    }

    pub fn merge(&mut self, other: SchemaNotes) {
        for (table, note) in other.tables {
            let entry = self.tables.entry(table.to_lowercase()).or_default();
            if note.description.is_some() {
                entry.description = note.description;
            }
            for (column, description) in note.columns {
                entry.columns.insert(column.to_lowercase(), description);
            }
        }
        for (term, targets) in other.synonyms {
            self.synonyms.entry(term.to_lowercase()).or_default().extend(targets);
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableNote> {
        self.tables.get(&name.to_lowercase())
    }

    /// Descriptions for the bundled medical admissions database.
    pub fn builtin() -> Self {
        let mut tables = HashMap::new();
        let mut add = |name: &str, description: &str, columns: &[(&str, &str)]| {
            tables.insert(
                name.to_string(),
                TableNote {
                    description: Some(description.to_string()),
                    columns: columns
                        .iter()
                        .map(|(c, d)| (c.to_string(), d.to_string()))
                        .collect(),
                },
            );
        };

        add(
            "json_patients",
            "patients with demographics (hasta bilgileri)",
            &[
                ("subject_id", "unique patient id"),
                ("gender", "gender M/F"),
                ("anchor_age", "patient age"),
                ("anchor_year", "reference year"),
                ("dod", "date of death if any"),
            ],
        );
        add(
            "json_admissions",
            "hospital admissions of patients (yatış bilgileri)",
            &[
                ("hadm_id", "unique admission id"),
                ("subject_id", "patient id, joins json_patients"),
                ("admittime", "admission time"),
                ("dischtime", "discharge time"),
                ("admission_type", "admission type such as EMERGENCY or ELECTIVE"),
                ("admission_location", "where the patient was admitted from"),
                ("discharge_location", "where the patient was discharged to"),
                ("admit_provider_id", "admitting provider, joins json_providers"),
                ("insurance", "insurance type"),
                ("race", "race of the patient"),
                ("marital_status", "marital status"),
            ],
        );
        add(
            "json_transfers",
            "patient transfers between care units (transfer bilgileri)",
            &[
                ("transfer_id", "unique transfer id"),
                ("subject_id", "patient id"),
                ("hadm_id", "admission id, joins json_admissions"),
                ("eventtype", "transfer event type: admit, transfer, discharge"),
                ("careunit", "care unit"),
                ("intime", "time in"),
                ("outtime", "time out"),
            ],
        );
        add(
            "json_providers",
            "healthcare providers and doctors (sağlık personeli)",
            &[
                ("provider_id", "unique provider id"),
                ("npi", "national provider identifier"),
                ("dea", "DEA number"),
            ],
        );
        add("json_lab", "laboratory test results", &[]);
        add("json_diagnoses", "diagnoses recorded for admissions", &[]);
        add("json_insurance", "insurance plans and coverage", &[]);
        add("json_careunits", "care units of the hospital", &[]);

        Self {
            tables,
            synonyms: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_descriptions_and_extends_synonyms() {
        let mut notes = SchemaNotes::builtin();
        let file: SchemaNotes = serde_json::from_str(
            r#"{
                "tables": {"JSON_Patients": {"description": "people", "columns": {"Gender": "sex"}}},
                "synonyms": {"kişi": ["patient"]}
            }"#,
        )
        .unwrap();
        notes.merge(file);

        let patients = notes.table("json_patients").unwrap();
        assert_eq!(patients.description.as_deref(), Some("people"));
        assert_eq!(patients.columns.get("gender").map(String::as_str), Some("sex"));
        assert_eq!(patients.columns.get("anchor_age").map(String::as_str), Some("patient age"));
        assert_eq!(notes.synonyms.get("kişi"), Some(&vec!["patient".to_string()]));
    }
}
