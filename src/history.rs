//! Query History
//!
//! SQLite-backed log of answered questions. Recording is best effort: the
//! orchestrator logs a failed write and still returns the answer.

use crate::error::{QueryBotError, Result};
use crate::response::PipelineResponse;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// One stored question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub trace_id: String,
    pub question: String,
    pub sql: String,
    pub answer: String,
    pub success: bool,
    pub execution_ms: u64,
    pub row_count: usize,
    pub llm_mode: String,
    pub tokens: u32,
    pub retry_occurred: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: u64,
    pub successes: u64,
    /// Percentage in [0, 100].
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub retries: u64,
}

pub struct QueryHistory {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl QueryHistory {
    /// Open (or create) the history database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(&path)
            .map_err(|e| QueryBotError::History(format!("Failed to open {}: {}", path.display(), e)))?;
        let history = Self {
            path,
            db: Mutex::new(db),
        };
        history.init_schema()?;
        Ok(history)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| QueryBotError::History("history connection poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS query_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                question TEXT NOT NULL,
                sql TEXT NOT NULL,
                answer TEXT NOT NULL,
                success INTEGER NOT NULL,
                execution_ms INTEGER NOT NULL,
                row_count INTEGER NOT NULL,
                llm_mode TEXT NOT NULL,
                tokens INTEGER NOT NULL,
                retry_occurred INTEGER NOT NULL,
                error TEXT,
                metadata TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_query_history_recorded_at ON query_history(recorded_at);
            "#,
        )
        .map_err(|e| QueryBotError::History(format!("Failed to create history table: {}", e)))?;
        Ok(())
    }

    pub fn record(&self, question: &str, response: &PipelineResponse) -> Result<()> {
        let meta = &response.meta;
        let metadata = serde_json::to_string(meta)?;
        let llm_mode = meta
            .llm
            .effective_mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| meta.llm.selected_mode.to_string());
        let error = meta.error.clone().or_else(|| {
            if meta.validation.error.is_empty() {
                None
            } else {
                Some(meta.validation.error.join("; "))
            }
        });

        let db = self.conn()?;
        db.execute(
            "INSERT INTO query_history (trace_id, question, sql, answer, success, execution_ms, row_count, \
             llm_mode, tokens, retry_occurred, error, metadata, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                meta.trace_id,
                question,
                response.sql,
                response.answer,
                response.is_success(),
                meta.performance.execution_ms as i64,
                meta.results.row_count as i64,
                llm_mode,
                meta.llm.tokens.total_tokens,
                meta.retry_occurred,
                error,
                metadata,
                timestamp(Utc::now()),
            ],
        )
        .map_err(|e| QueryBotError::History(format!("Failed to record query: {}", e)))?;
        debug!("Recorded {} in history", meta.trace_id);
        Ok(())
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_ENTRIES))?;
        let rows = stmt.query_map(params![limit as i64], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Every entry, oldest first, as a pretty-printed JSON array.
    pub fn export_json(&self) -> Result<String> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{} ORDER BY id ASC", SELECT_ENTRIES))?;
        let rows = stmt.query_map([], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Delete entries recorded before `now - older_than`, or all of them.
    /// Returns the number removed.
    pub fn clear(&self, older_than: Option<Duration>) -> Result<usize> {
        let db = self.conn()?;
        let removed = match older_than {
            Some(age) => db.execute(
                "DELETE FROM query_history WHERE recorded_at < ?1",
                params![timestamp(Utc::now() - age)],
            ),
            None => db.execute("DELETE FROM query_history", []),
        }
        .map_err(|e| QueryBotError::History(format!("Failed to clear history: {}", e)))?;
        debug!("Cleared {} history entries", removed);
        Ok(removed)
    }

    /// Returns whether an entry with that id existed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let db = self.conn()?;
        let removed = db
            .execute("DELETE FROM query_history WHERE id = ?1", params![id])
            .map_err(|e| QueryBotError::History(format!("Failed to delete entry {}: {}", id, e)))?;
        Ok(removed > 0)
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let db = self.conn()?;
        let (total, successes, avg_execution_ms, retries): (i64, i64, f64, i64) = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0), COALESCE(AVG(execution_ms), 0.0), \
             COALESCE(SUM(retry_occurred), 0) FROM query_history",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let success_rate = if total > 0 {
            successes as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok(HistoryStats {
            total: total as u64,
            successes: successes as u64,
            success_rate,
            avg_execution_ms,
            retries: retries as u64,
        })
    }
}

const SELECT_ENTRIES: &str = "SELECT id, trace_id, question, sql, answer, success, execution_ms, row_count, \
     llm_mode, tokens, retry_occurred, error, recorded_at FROM query_history";

/// Fixed-width UTC timestamps so `recorded_at` sorts and compares as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let recorded_at: String = row.get(12)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        question: row.get(2)?,
        sql: row.get(3)?,
        answer: row.get(4)?,
        success: row.get(5)?,
        execution_ms: row.get::<_, i64>(6)? as u64,
        row_count: row.get::<_, i64>(7)? as usize,
        llm_mode: row.get(8)?,
        tokens: row.get(9)?,
        retry_occurred: row.get(10)?,
        error: row.get(11)?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}
