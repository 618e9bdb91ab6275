//! SQLite execution under a wall-clock budget.
//!
//! Every query runs on a fresh read-only connection on the blocking pool.
//! When the budget runs out the statement is interrupted and the call fails
//! with `ExecutionTimeout`.

use crate::error::{QueryBotError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rows kept in memory per query; further rows are only counted.
const MAX_FETCHED_ROWS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub execution_ms: u64,
}

pub struct SqlExecutor {
    database_path: PathBuf,
    timeout: Duration,
}

impl SqlExecutor {
    pub fn new(database_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let database_path = database_path.into();
        if !database_path.exists() {
            return Err(QueryBotError::Database(format!(
                "Database file not found: {}",
                database_path.display()
            )));
        }
        Ok(Self {
            database_path,
            timeout,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Open a read-only connection to the configured database.
    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.database_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(conn)
    }

    /// Run already validated SQL.
    pub async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let conn = self.open()?;
        let interrupt = conn.get_interrupt_handle();
        let sql = sql.to_string();
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || run_query(&conn, &sql));
        let (columns, rows, row_count) = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| QueryBotError::Execution(format!("Query task failed: {}", e)))??,
            Err(_) => {
                interrupt.interrupt();
                warn!("Query interrupted after {:?}", self.timeout);
                return Err(QueryBotError::ExecutionTimeout(self.timeout));
            }
        };

        let execution_ms = started.elapsed().as_millis() as u64;
        debug!("Query returned {} rows in {} ms", row_count, execution_ms);
        Ok(QueryOutput {
            columns,
            rows,
            row_count,
            execution_ms,
        })
    }
}

type Fetched = (Vec<String>, Vec<Vec<serde_json::Value>>, usize);

fn run_query(conn: &Connection, sql: &str) -> Result<Fetched> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| QueryBotError::Execution(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut row_count = 0;
    let mut cursor = stmt
        .query([])
        .map_err(|e| QueryBotError::Execution(e.to_string()))?;
    while let Some(row) = cursor
        .next()
        .map_err(|e| QueryBotError::Execution(e.to_string()))?
    {
        row_count += 1;
        if rows.len() >= MAX_FETCHED_ROWS {
            continue;
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let value = row
                .get_ref(i)
                .map_err(|e| QueryBotError::Execution(e.to_string()))?;
            values.push(to_json(value));
        }
        rows.push(values);
    }
    Ok((columns, rows, row_count))
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}
