//! Term normalisation and keyword scoring
//!
//! Questions arrive mostly in Turkish while the schema is named in English.
//! Tokens are folded to ASCII-ish lower case, mapped through a synonym table
//! and matched against table/column/description tokens by prefix so that
//! inflected forms ("hastaların", "yatışlar") still hit.

use crate::schema::TableSchema;
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap, HashSet};

const NAME_WEIGHT: f32 = 1.0;
const COLUMN_WEIGHT: f32 = 0.6;
const DESCRIPTION_WEIGHT: f32 = 0.3;

/// Shortest synonym key that may match an inflected token by prefix.
const MIN_PREFIX_LEN: usize = 3;
/// Shortest term length for which prefix matching against the schema applies.
const MIN_STEM_LEN: usize = 4;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = [
        // Turkish
        "kac", "var", "mi", "mu", "ne", "nedir", "nasil", "hangi", "en", "ve", "ile", "icin",
        "gore", "bir", "bu", "su", "olan", "tane", "kadar", "toplam", "sayisi", "sayilari",
        "sayisini", "dagilimi", "dagilim", "listele", "goster", "getir", "kayit", "tablo",
        "tablosunda", "da", "de", "mi", "cok", "fazla", "az",
        // English
        "the", "of", "how", "many", "what", "is", "are", "a", "an", "in", "by", "for", "to",
        "and", "or", "per", "each", "with", "show", "list", "count", "number", "total", "all",
        "json", "table", "there", "me", "which", "do", "does",
    ]
    .into_iter()
    .collect();
}

/// Built-in source-language (Turkish) to schema-language (English) mapping.
const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("hasta", &["patient", "patients"]),
    ("yatis", &["admission", "admissions"]),
    ("kabul", &["admit", "admission"]),
    ("giris", &["admission", "intime"]),
    ("cikis", &["discharge", "dischtime", "outtime"]),
    ("taburcu", &["discharge"]),
    ("doktor", &["provider", "providers"]),
    ("hekim", &["provider", "providers"]),
    ("personel", &["provider", "providers"]),
    ("yas", &["age"]),
    ("cinsiyet", &["gender"]),
    ("erkek", &["gender"]),
    ("kadin", &["gender"]),
    ("transfer", &["transfer", "transfers"]),
    ("nakil", &["transfer", "transfers"]),
    ("bakim", &["careunit", "care"]),
    ("birim", &["careunit", "unit"]),
    ("servis", &["careunit"]),
    ("klinik", &["careunit"]),
    ("bolum", &["careunit"]),
    ("sigorta", &["insurance"]),
    ("tani", &["diagnosis", "diagnoses"]),
    ("teshis", &["diagnosis", "diagnoses"]),
    ("laboratuvar", &["lab"]),
    ("tahlil", &["lab"]),
    ("irk", &["race"]),
    ("medeni", &["marital"]),
    ("olum", &["dod", "death"]),
    ("acil", &["emergency", "admission_type"]),
    ("tip", &["type"]),
    ("tur", &["type"]),
];

/// Lower-case and fold Turkish letters so "Yatışlar" and "yatislar" compare equal.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| *c != '\u{0307}')
        .map(|c| match c {
            'ı' => 'i',
            'ş' => 's',
            'ğ' => 'g',
            'ü' => 'u',
            'ö' => 'o',
            'ç' => 'c',
            'â' => 'a',
            'î' => 'i',
            'û' => 'u',
            other => other,
        })
        .collect()
}

/// Split text into folded tokens; underscores separate tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Exact match, or prefix match in either direction once both are long enough.
pub fn terms_match(query_term: &str, doc_term: &str) -> bool {
    if query_term == doc_term {
        return true;
    }
    let shorter = query_term.len().min(doc_term.len());
    shorter >= MIN_STEM_LEN && (doc_term.starts_with(query_term) || query_term.starts_with(doc_term))
}

/// One informative question word together with the schema terms it maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    pub source: String,
    pub forms: Vec<String>,
}

/// Source-language to schema-language term map.
#[derive(Debug, Clone)]
pub struct TermMap {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for TermMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TermMap {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_SYNONYMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|t| t.to_string()).collect()))
                .collect(),
        }
    }

    /// Add user-provided synonyms; keys are folded before use.
    pub fn with_extra(mut self, extra: &HashMap<String, Vec<String>>) -> Self {
        let mut keys: Vec<&String> = extra.keys().collect();
        keys.sort();
        for key in keys {
            let targets = extra[key].iter().map(|t| fold(t)).collect();
            self.entries.push((fold(key), targets));
        }
        self
    }

    fn lookup(&self, token: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (key, targets) in &self.entries {
            let hit = token == key.as_str()
                || (key.chars().count() >= MIN_PREFIX_LEN && token.starts_with(key.as_str()));
            if hit {
                for target in targets {
                    for piece in tokenize(target) {
                        if !out.contains(&piece) {
                            out.push(piece);
                        }
                    }
                }
            }
        }
        out
    }

    /// Turn a question into distinct concepts, dropping stop-words.
    pub fn concepts(&self, question: &str) -> Vec<Concept> {
        let mut seen = HashSet::new();
        let mut concepts = Vec::new();
        for token in tokenize(question) {
            if STOPWORDS.contains(token.as_str()) || !seen.insert(token.clone()) {
                continue;
            }
            let mut forms = vec![token.clone()];
            for mapped in self.lookup(&token) {
                if !forms.contains(&mapped) {
                    forms.push(mapped);
                }
            }
            concepts.push(Concept { source: token, forms });
        }
        concepts
    }
}

/// Tokens of one table, split by where they came from.
#[derive(Debug, Clone, Default)]
pub struct TableTerms {
    pub name: Vec<String>,
    pub columns: Vec<String>,
    pub description: Vec<String>,
}

impl TableTerms {
    pub fn from_table(table: &TableSchema) -> Self {
        let name = tokenize(&table.name);
        let mut columns = Vec::new();
        let mut description = table
            .description
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();
        for column in &table.columns {
            columns.extend(tokenize(&column.name));
            if let Some(ref note) = column.description {
                description.extend(tokenize(note));
            }
        }
        columns.sort();
        columns.dedup();
        description.sort();
        description.dedup();
        Self {
            name,
            columns,
            description,
        }
    }

    fn weight_for(&self, form: &str) -> f32 {
        if self.name.iter().any(|t| terms_match(form, t)) {
            NAME_WEIGHT
        } else if self.columns.iter().any(|t| terms_match(form, t)) {
            COLUMN_WEIGHT
        } else if self.description.iter().any(|t| terms_match(form, t)) {
            DESCRIPTION_WEIGHT
        } else {
            0.0
        }
    }
}

/// Keyword overlap in [0, 1] plus the forms that matched.
pub fn keyword_score(concepts: &[Concept], table: &TableTerms) -> (f32, BTreeSet<String>) {
    if concepts.is_empty() {
        return (0.0, BTreeSet::new());
    }
    let mut total = 0.0;
    let mut reasons = BTreeSet::new();
    for concept in concepts {
        let mut best = 0.0f32;
        for form in &concept.forms {
            let weight = table.weight_for(form);
            if weight > 0.0 {
                reasons.insert(form.clone());
            }
            best = best.max(weight);
        }
        total += best;
    }
    (total / concepts.len() as f32, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;

    fn table(name: &str, columns: &[&str], description: Option<&str>) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnSchema {
                    name: c.to_string(),
                    data_type: "TEXT".to_string(),
                    is_primary_key: false,
                    description: None,
                })
                .collect(),
            row_count: 0,
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn fold_handles_turkish_letters() {
        assert_eq!(fold("Yatışların"), "yatislarin");
        assert_eq!(fold("İLAÇ"), "ilac");
        assert_eq!(fold("Çıkış"), "cikis");
    }

    #[test]
    fn inflected_turkish_words_map_to_schema_terms() {
        let concepts = TermMap::builtin().concepts("Hastaların yatışları kaç tane?");
        let sources: Vec<&str> = concepts.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["hastalarin", "yatislari"]);
        assert!(concepts[0].forms.contains(&"patient".to_string()));
        assert!(concepts[1].forms.contains(&"admission".to_string()));
    }

    #[test]
    fn table_name_outweighs_column_and_description() {
        let concepts = TermMap::builtin().concepts("Kaç hasta var?");
        let patients = TableTerms::from_table(&table("json_patients", &["gender"], None));
        let admissions = TableTerms::from_table(&table("json_admissions", &["subject_id"], Some("admissions of patients")));

        let (p, reasons) = keyword_score(&concepts, &patients);
        let (a, _) = keyword_score(&concepts, &admissions);
        assert!((p - 1.0).abs() < f32::EPSILON);
        assert!((a - DESCRIPTION_WEIGHT).abs() < f32::EPSILON);
        assert!(reasons.contains("patient") || reasons.contains("patients"));
    }

    #[test]
    fn extra_synonyms_are_folded() {
        let mut extra = HashMap::new();
        extra.insert("Kişi".to_string(), vec!["patient".to_string()]);
        let concepts = TermMap::builtin().with_extra(&extra).concepts("kişiler");
        assert!(concepts[0].forms.contains(&"patient".to_string()));
    }

    #[test]
    fn no_concepts_scores_zero() {
        let concepts = TermMap::builtin().concepts("kaç tane var?");
        assert!(concepts.is_empty());
        let (score, reasons) = keyword_score(&concepts, &TableTerms::default());
        assert_eq!(score, 0.0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn short_terms_require_exact_match() {
        assert!(terms_match("age", "age"));
        assert!(!terms_match("ag", "age"));
        assert!(terms_match("patient", "patients"));
        assert!(!terms_match("lab", "label"));
    }
}
