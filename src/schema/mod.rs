//! Schema Catalog
//!
//! Read-only snapshot of the allow-listed tables: columns, row counts and
//! human descriptions. Retrieval and prompting work against this snapshot.

pub mod notes;

use crate::error::{QueryBotError, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub use notes::{SchemaNotes, TableNote};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub row_count: u64,
    pub description: Option<String>,
}

impl TableSchema {
    /// Render the snippet text shown to the model.
    pub fn render(&self) -> String {
        let mut out = format!("Table {} ({} rows)", self.name, self.row_count);
        if let Some(ref description) = self.description {
            out.push_str(&format!(": {}", description));
        }
        for column in &self.columns {
            out.push_str(&format!("\n  - {} {}", column.name, column.data_type));
            if column.is_primary_key {
                out.push_str(" PRIMARY KEY");
            }
            if let Some(ref description) = column.description {
                out.push_str(&format!(" -- {}", description));
            }
        }
        out
    }
}

/// Tables in database declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Load allow-listed tables from an open SQLite connection.
    pub fn load(conn: &Connection, allowed_tables: &[String], notes: &SchemaNotes) -> Result<Self> {
        let allowed: HashSet<String> = allowed_tables.iter().map(|t| t.to_lowercase()).collect();

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY rowid",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tables = Vec::new();
        let mut found = HashSet::new();
        for name in names {
            let lowered = name.to_lowercase();
            if !allowed.contains(&lowered) {
                continue;
            }
            found.insert(lowered);
            tables.push(Self::load_table(conn, &name, notes)?);
        }

        for missing in allowed.difference(&found) {
            warn!("Allow-listed table '{}' does not exist in the database", missing);
        }
        if tables.is_empty() {
            return Err(QueryBotError::Schema(
                "None of the allow-listed tables exist in the database".to_string(),
            ));
        }

        info!("Schema catalog loaded with {} tables", tables.len());
        Ok(Self { tables })
    }

    fn load_table(conn: &Connection, name: &str, notes: &SchemaNotes) -> Result<TableSchema> {
        let quoted = quote_identifier(name);
        let note = notes.table(name);

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted))?;
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(column, data_type, pk)| ColumnSchema {
                description: note.and_then(|n| n.columns.get(&column.to_lowercase()).cloned()),
                name: column,
                data_type: data_type.filter(|t| !t.is_empty()).unwrap_or_else(|| "ANY".to_string()),
                is_primary_key: pk > 0,
            })
            .collect();

        let row_count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| {
            row.get(0)
        })?;

        Ok(TableSchema {
            name: name.to_string(),
            columns,
            row_count: row_count.max(0) as u64,
            description: note.and_then(|n| n.description.clone()),
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
