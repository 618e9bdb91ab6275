//! Query shape heuristics reported in response metadata.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref COUNT_ROOT_RE: Regex = Regex::new(r"(?i)^\s*SELECT\s+COUNT\s*\(").unwrap();
    static ref SELECT_ROOT_RE: Regex = Regex::new(r"(?i)^\s*SELECT\b").unwrap();
    static ref GROUP_BY_RE: Regex = Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap();
    static ref ORDER_BY_RE: Regex = Regex::new(r"(?i)\bORDER\s+BY\b").unwrap();
    static ref JOIN_RE: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref HAVING_RE: Regex = Regex::new(r"(?i)\bHAVING\b").unwrap();
    static ref WHERE_RE: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
    static ref COUNT_RE: Regex = Regex::new(r"(?i)\bCOUNT\s*\(").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "COUNT_QUERY")]
    Count,
    #[serde(rename = "GROUP_BY_QUERY")]
    GroupBy,
    #[serde(rename = "ORDERED_QUERY")]
    Ordered,
    #[serde(rename = "JOIN_QUERY")]
    Join,
    #[serde(rename = "SELECT_QUERY")]
    Select,
    #[serde(rename = "OTHER")]
    Other,
    /// Validated SQL that failed at execution time.
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Count => "COUNT_QUERY",
            QueryType::GroupBy => "GROUP_BY_QUERY",
            QueryType::Ordered => "ORDERED_QUERY",
            QueryType::Join => "JOIN_QUERY",
            QueryType::Select => "SELECT_QUERY",
            QueryType::Other => "OTHER",
            QueryType::Error => "ERROR",
            QueryType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Unknown,
}

pub fn classify_query_type(sql: &str) -> QueryType {
    if sql.trim().is_empty() {
        QueryType::Unknown
    } else if COUNT_ROOT_RE.is_match(sql) {
        QueryType::Count
    } else if !SELECT_ROOT_RE.is_match(sql) {
        QueryType::Other
    } else if GROUP_BY_RE.is_match(sql) {
        QueryType::GroupBy
    } else if ORDER_BY_RE.is_match(sql) {
        QueryType::Ordered
    } else if JOIN_RE.is_match(sql) {
        QueryType::Join
    } else {
        QueryType::Select
    }
}

/// JOIN weighs 2; GROUP BY, ORDER BY, HAVING, WHERE and COUNT 1 each.
pub fn assess_complexity(sql: &str) -> Complexity {
    if sql.trim().is_empty() {
        return Complexity::Unknown;
    }
    let weighted: [(&Regex, u32); 6] = [
        (&*JOIN_RE, 2),
        (&*GROUP_BY_RE, 1),
        (&*ORDER_BY_RE, 1),
        (&*HAVING_RE, 1),
        (&*WHERE_RE, 1),
        (&*COUNT_RE, 1),
    ];
    let score: u32 = weighted
        .iter()
        .filter(|(re, _)| re.is_match(sql))
        .map(|(_, w)| w)
        .sum();
    match score {
        0..=1 => Complexity::Simple,
        2..=3 => Complexity::Medium,
        _ => Complexity::Complex,
    }
}
