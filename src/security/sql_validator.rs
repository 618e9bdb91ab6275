//! SQL Safety Validation
//!
//! Checks a candidate statement against the read-only policy:
//! a single SELECT, no write/DDL keywords anywhere in the text, only
//! allow-listed tables, and no LIMIT without ORDER BY. Every violated rule
//! is reported so a repair prompt can address all of them at once.

use crate::security::allowlist::Allowlist;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{visit_relations, Expr, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "pragma", "vacuum",
    "truncate", "replace",
];

lazy_static! {
    static ref FORBIDDEN_RE: Regex = Regex::new(&format!(
        r"(?i)\b({})\b",
        FORBIDDEN_KEYWORDS.join("|")
    ))
    .unwrap();
    static ref TOKEN_RE: Regex =
        Regex::new(r#""[^"]*"|`[^`]*`|\[[^\]]*\]|[A-Za-z_][A-Za-z0-9_$]*(?:\.[A-Za-z_][A-Za-z0-9_$]*)*|[(),;]"#)
            .unwrap();
}

/// Clause keywords that can follow a table reference, never aliases.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
    "CROSS", "NATURAL", "OUTER", "ON", "USING", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
    "OFFSET",
];

/// Policy rules, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Empty,
    MultipleStatements,
    NotSelect,
    ForbiddenKeyword,
    TableNotAllowed,
    LimitWithoutOrderBy,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Empty => "empty",
            Rule::MultipleStatements => "multiple_statements",
            Rule::NotSelect => "not_select",
            Rule::ForbiddenKeyword => "forbidden_keyword",
            Rule::TableNotAllowed => "table_not_allowed",
            Rule::LimitWithoutOrderBy => "limit_without_order_by",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violated_rules: Vec<Rule>,
    pub normalized_sql: String,
    /// Referenced tables, lower-cased, in order of first appearance.
    pub tables: Vec<String>,
    pub blocked_tables: Vec<String>,
    pub forbidden_keywords: Vec<String>,
    /// Unknown table -> closest allowed table.
    pub suggestions: BTreeMap<String, String>,
}

impl ValidationResult {
    /// One human-readable line per violated rule.
    pub fn errors(&self) -> Vec<String> {
        self.violated_rules
            .iter()
            .map(|rule| match rule {
                Rule::Empty => "Query is empty".to_string(),
                Rule::MultipleStatements => "Only a single SQL statement is allowed".to_string(),
                Rule::NotSelect => "Only SELECT statements are allowed".to_string(),
                Rule::ForbiddenKeyword => format!(
                    "Forbidden keyword(s): {}",
                    self.forbidden_keywords.join(", ").to_uppercase()
                ),
                Rule::TableNotAllowed => {
                    format!("Table(s) not in allow-list: {}", self.blocked_tables.join(", "))
                }
                Rule::LimitWithoutOrderBy => "LIMIT requires an ORDER BY clause".to_string(),
            })
            .collect()
    }
}

pub struct SqlValidator;

impl SqlValidator {
    pub fn validate(&self, sql: &str, allowlist: &Allowlist) -> ValidationResult {
        let normalized_sql = normalize(sql);
        let mut result = ValidationResult {
            is_valid: false,
            violated_rules: Vec::new(),
            normalized_sql,
            tables: Vec::new(),
            blocked_tables: Vec::new(),
            forbidden_keywords: Vec::new(),
            suggestions: BTreeMap::new(),
        };

        let masked = mask_literals_and_comments(&result.normalized_sql);
        let statements: Vec<&str> = masked
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .collect();
        if statements.is_empty() {
            result.violated_rules.push(Rule::Empty);
            return result;
        }

        // 1. single statement
        if statements.len() > 1 {
            result.violated_rules.push(Rule::MultipleStatements);
        }

        // 2. SELECT root, no write/DDL keyword anywhere in the raw text
        let root = statements[0]
            .trim_start()
            .trim_start_matches('(')
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .find(|w| !w.is_empty())
            .unwrap_or("")
            .to_uppercase();
        if root != "SELECT" {
            result.violated_rules.push(Rule::NotSelect);
        }
        for found in FORBIDDEN_RE.find_iter(&result.normalized_sql) {
            let keyword = found.as_str().to_lowercase();
            if !result.forbidden_keywords.contains(&keyword) {
                result.forbidden_keywords.push(keyword);
            }
        }
        if !result.forbidden_keywords.is_empty() {
            result.violated_rules.push(Rule::ForbiddenKeyword);
        }

        // 3. allow-listed tables only
        let parsed = Parser::parse_sql(&SQLiteDialect {}, &result.normalized_sql).ok();
        result.tables = match parsed {
            Some(ref statements) => tables_from_ast(statements),
            None => tables_from_tokens(&masked),
        };
        for table in &result.tables {
            if !allowlist.contains(table) {
                result.blocked_tables.push(table.clone());
                if let Some(suggestion) = allowlist.suggest(table) {
                    result.suggestions.insert(table.clone(), suggestion);
                }
            }
        }
        if !result.blocked_tables.is_empty() {
            result.violated_rules.push(Rule::TableNotAllowed);
        }

        // 4. LIMIT needs ORDER BY on the same query
        let unordered_limit = match parsed {
            Some(ref statements) => has_unordered_limit(statements),
            None => {
                let tokens = upper_tokens(&masked);
                let has_limit = tokens.iter().any(|t| t == "LIMIT");
                let has_order_by = tokens.windows(2).any(|w| w[0] == "ORDER" && w[1] == "BY");
                has_limit && !has_order_by
            }
        };
        if unordered_limit {
            result.violated_rules.push(Rule::LimitWithoutOrderBy);
        }

        result.is_valid = result.violated_rules.is_empty();
        result
    }
}

/// Trim whitespace and trailing semicolons.
pub fn normalize(sql: &str) -> String {
    let mut out = sql.trim();
    while let Some(stripped) = out.strip_suffix(';') {
        out = stripped.trim_end();
    }
    out.to_string()
}

/// Blank out string literals and comments so keywords and `;` inside them
/// are not mistaken for structure. Quoted identifiers are kept, minus `;`.
fn mask_literals_and_comments(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        Literal,
        Identifier,
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Normal;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Normal => match (c, next) {
                ('\'', _) => {
                    state = State::Literal;
                    out.push(' ');
                }
                ('"', _) => {
                    state = State::Identifier;
                    out.push(c);
                }
                ('-', Some('-')) => {
                    state = State::LineComment;
                    out.push_str("  ");
                    i += 1;
                }
                ('/', Some('*')) => {
                    state = State::BlockComment;
                    out.push_str("  ");
                    i += 1;
                }
                _ => out.push(c),
            },
            State::Literal => {
                if c == '\'' && next == Some('\'') {
                    out.push_str("  ");
                    i += 1;
                } else {
                    if c == '\'' {
                        state = State::Normal;
                    }
                    out.push(' ');
                }
            }
            State::Identifier => {
                if c == '"' {
                    state = State::Normal;
                }
                out.push(if c == ';' { ' ' } else { c });
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Normal;
                    out.push_str("  ");
                    i += 1;
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }
    out
}

/// Relations named anywhere in the parsed statements, CTE names excluded.
fn tables_from_ast(statements: &[Statement]) -> Vec<String> {
    let mut cte_names = HashSet::new();
    for statement in statements {
        if let Statement::Query(query) = statement {
            if let Some(ref with) = query.with {
                for cte in &with.cte_tables {
                    cte_names.insert(cte.alias.name.value.to_lowercase());
                }
            }
        }
    }

    let mut tables: Vec<String> = Vec::new();
    for statement in statements {
        let _ = visit_relations(statement, |relation| {
            if let Some(ident) = relation.0.last() {
                let name = ident.value.to_lowercase();
                if !cte_names.contains(&name) && !tables.contains(&name) {
                    tables.push(name);
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }
    tables
}

/// Finds any query, top level or nested, with a LIMIT but no ORDER BY of
/// its own. Window `OVER (ORDER BY ..)` clauses do not count.
struct UnorderedLimit {
    found: bool,
}

impl UnorderedLimit {
    fn check(&mut self, query: &Query) {
        if query.limit.is_some() && query.order_by.is_empty() {
            self.found = true;
        }
        if let Some(ref with) = query.with {
            for cte in &with.cte_tables {
                self.check(&cte.query);
            }
        }
        self.check_set_expr(&query.body);
    }

    fn check_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Query(inner) => self.check(inner),
            SetExpr::SetOperation { left, right, .. } => {
                self.check_set_expr(left);
                self.check_set_expr(right);
            }
            _ => {}
        }
    }
}

impl Visitor for UnorderedLimit {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        match statement {
            Statement::Query(query) => self.check(query),
            Statement::Delete { order_by, limit, .. } if limit.is_some() && order_by.is_empty() => {
                self.found = true;
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Derived { subquery, .. } = table_factor {
            self.check(subquery);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Subquery(subquery)
            | Expr::ArraySubquery(subquery)
            | Expr::InSubquery { subquery, .. }
            | Expr::Exists { subquery, .. } => self.check(subquery),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn has_unordered_limit(statements: &[Statement]) -> bool {
    let mut visitor = UnorderedLimit { found: false };
    for statement in statements {
        let _ = statement.visit(&mut visitor);
    }
    visitor.found
}

fn strip_identifier_quotes(token: &str) -> String {
    let unquoted = token
        .trim_start_matches(['"', '`', '['])
        .trim_end_matches(['"', '`', ']']);
    unquoted.rsplit('.').next().unwrap_or(unquoted).to_lowercase()
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_' || c == '"' || c == '`' || c == '[')
        .unwrap_or(false)
}

/// FROM/JOIN followed by a table, optional alias, and comma-separated
/// further tables. SQLite's `expr IN table` and `expr IN table_function(..)`
/// forms also name a table; `IN (` is a list or subquery.
fn tables_from_tokens(masked: &str) -> Vec<String> {
    let tokens: Vec<&str> = TOKEN_RE.find_iter(masked).map(|m| m.as_str()).collect();
    let is_keyword = |t: &str| CLAUSE_KEYWORDS.contains(&t.to_uppercase().as_str());

    let mut tables: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let upper = tokens[i].to_uppercase();
        if upper == "IN" {
            i += 1;
            if let Some(t) = tokens.get(i) {
                if is_identifier(t) && !is_keyword(t) && !t.eq_ignore_ascii_case("SELECT") {
                    let name = strip_identifier_quotes(t);
                    if !tables.contains(&name) {
                        tables.push(name);
                    }
                    i += 1;
                }
            }
            continue;
        }
        if upper != "FROM" && upper != "JOIN" {
            i += 1;
            continue;
        }
        i += 1;
        loop {
            match tokens.get(i) {
                Some(t) if is_identifier(t) && !is_keyword(t) && !t.eq_ignore_ascii_case("SELECT") => {
                    let name = strip_identifier_quotes(t);
                    if !tables.contains(&name) {
                        tables.push(name);
                    }
                    i += 1;
                }
                _ => break,
            }
            // optional alias
            if tokens.get(i).map(|t| t.eq_ignore_ascii_case("AS")).unwrap_or(false) {
                i += 2;
            } else if tokens
                .get(i)
                .map(|t| is_identifier(t) && !is_keyword(t))
                .unwrap_or(false)
            {
                i += 1;
            }
            if tokens.get(i) == Some(&",") {
                i += 1;
            } else {
                break;
            }
        }
    }
    tables
}

fn upper_tokens(masked: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(masked)
        .map(|m| m.as_str().to_uppercase())
        .collect()
}
