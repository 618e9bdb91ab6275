use querybot::config::Config;
use querybot::llm::LlmMode;
use querybot::orchestrator::{AskOptions, QueryOrchestrator};
use querybot::response::PipelineResponse;
use querybot::schema_rag::RetrievalFilter;
use querybot::QueryHistory;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "querybot")]
#[command(about = "Answer natural-language questions over a SQLite database with validated SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// The question in natural language
        question: String,

        /// Override LLM_MODE for this question (auto, hosted, local)
        #[arg(long)]
        mode: Option<LlmMode>,

        /// Only consider this table during schema retrieval
        #[arg(long)]
        table: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the allow-listed schema
    Schema,
    /// Show recent questions
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print aggregate statistics instead of entries
        #[arg(long)]
        stats: bool,

        /// Write every entry to this file as JSON
        #[arg(long, value_name = "PATH")]
        export: Option<PathBuf>,

        /// Delete entries (all of them unless --older-than-days is given)
        #[arg(long)]
        clear: bool,

        /// With --clear, only delete entries older than this many days
        #[arg(long, requires = "clear")]
        older_than_days: Option<u32>,

        /// Delete the entry with this id
        #[arg(long, value_name = "ID")]
        delete: Option<i64>,
    },
    /// Show LLM backend status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("querybot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask { question, mode, table, json } => {
            let orchestrator = QueryOrchestrator::from_config(&config).await?;
            let options = AskOptions {
                mode,
                filter: RetrievalFilter { table },
            };
            let response = orchestrator.answer_with(&question, &options).await;
            if json {
                println!("{}", response.to_json_pretty()?);
            } else {
                print_response(&response);
            }
        }
        Commands::Schema => {
            let orchestrator = QueryOrchestrator::from_config(&config).await?;
            let catalog = orchestrator.catalog();
            let missing = orchestrator
                .allowlist()
                .names()
                .into_iter()
                .filter(|name| catalog.table(name).is_none())
                .join(", ");
            for table in &catalog.tables {
                println!("{}\n", table.render());
            }
            if !missing.is_empty() {
                println!("Allow-listed but missing from the database: {}", missing);
            }
        }
        Commands::History {
            limit,
            stats,
            export,
            clear,
            older_than_days,
            delete,
        } => {
            let path = config
                .history_path
                .as_ref()
                .ok_or_else(|| anyhow!("HISTORY_PATH is not set, query history is disabled"))?;
            let history = QueryHistory::open(path)?;
            if let Some(target) = export {
                std::fs::write(&target, history.export_json()?)?;
                println!("Exported history to {}", target.display());
            } else if clear {
                let removed = history.clear(older_than_days.map(|days| chrono::Duration::days(days.into())))?;
                println!("Removed {} entries", removed);
            } else if let Some(id) = delete {
                if history.delete(id)? {
                    println!("Deleted entry {}", id);
                } else {
                    return Err(anyhow!("No history entry with id {}", id));
                }
            } else if stats {
                let stats = history.stats()?;
                println!("Total questions: {}", stats.total);
                println!("Successful:      {} ({:.1}%)", stats.successes, stats.success_rate);
                println!("Repaired:        {}", stats.retries);
                println!("Avg execution:   {:.1} ms", stats.avg_execution_ms);
            } else {
                for entry in history.recent(limit)? {
                    let status = if entry.success { "ok" } else { "failed" };
                    println!(
                        "#{} [{}] {} ({}, {})",
                        entry.id,
                        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.question,
                        status,
                        entry.llm_mode
                    );
                    if !entry.sql.is_empty() {
                        println!("    {}", entry.sql);
                    }
                }
            }
        }
        Commands::Status => {
            let gateway = querybot::LlmGateway::from_config(&config.llm)?;
            let status = gateway.status().await;
            info!("Configured mode: {}", status.configured_mode);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn print_response(response: &PipelineResponse) {
    let meta = &response.meta;
    println!("\n{}", "=".repeat(80));
    println!(" {}", response.answer);
    println!("{}", "=".repeat(80));

    if !response.sql.is_empty() {
        println!("\n SQL: {}", response.sql);
    }
    println!(
        " Type: {} | Complexity: {:?} | Rows: {} | {} ms",
        meta.database.query_type.as_str(),
        meta.database.complexity,
        meta.results.row_count,
        meta.performance.execution_ms
    );
    if !meta.database.tables_used.is_empty() {
        println!(" Tables: {}", meta.database.tables_used.iter().join(", "));
    }
    if meta.retry_occurred {
        println!(" Repaired once ({} validation attempts)", meta.validation.attempts);
    }
    if !meta.validation.is_valid && !meta.validation.error.is_empty() {
        println!(" Validation: {}", meta.validation.error.iter().join("; "));
    }
    if let Some(mode) = meta.llm.effective_mode {
        println!(
            " Model: {} ({}) | Tokens: {}",
            meta.llm.model_used.as_deref().unwrap_or("-"),
            mode,
            meta.llm.tokens.total_tokens
        );
    }
    println!(" Trace: {}", meta.trace_id);
}
