use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use queryguard::audit::PostgresAuditSink;
use queryguard::config::CoreConfig;
use queryguard::db::{init_pool, PgWarehouse};
use queryguard::llm::OpenAiGenerator;
use queryguard::pipeline::{ChatPipeline, ChatReply};

#[derive(Parser)]
#[command(name = "queryguard")]
#[command(about = "Ask the warehouse a question in natural language")]
struct Args {
    /// The question to answer
    question: String,

    /// Actor identity recorded in the audit log
    #[arg(long, default_value = "cli")]
    actor: String,

    /// Statement timeout in milliseconds (overrides QUERY_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum rows returned (overrides QUERY_MAX_ROWS)
    #[arg(long)]
    max_rows: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "queryguard=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = CoreConfig::from_env()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.limits.statement_timeout_ms = timeout_ms;
    }
    if let Some(max_rows) = args.max_rows {
        config.limits.max_rows = max_rows;
    }

    info!("connecting to warehouse");
    let pool = init_pool(&config.warehouse).await?;

    let generator = Arc::new(OpenAiGenerator::new(config.generator.clone())?);
    let warehouse = Arc::new(PgWarehouse::new(
        pool.clone(),
        config.warehouse.schema_name.clone(),
    ));
    let audit = Arc::new(PostgresAuditSink::new(pool));

    let pipeline = ChatPipeline::new(
        generator,
        warehouse,
        audit,
        config.validator,
        config.limits,
    );

    let snapshot = pipeline.refresh_schema().await?;
    info!(tables = snapshot.table_count(), "schema snapshot captured");

    let answer = pipeline.answer(&args.question, &[], &args.actor).await;

    if let Some(sql) = &answer.sql {
        println!("SQL: {sql}\n");
    }
    match &answer.reply {
        ChatReply::Rows(rows) => {
            println!("{}", rows.columns.join(" | "));
            for row in &rows.rows {
                let cells: Vec<String> = row.iter().map(render_cell).collect();
                println!("{}", cells.join(" | "));
            }
            if rows.truncated {
                println!("... truncated at {} rows", rows.row_count);
            }
            println!("\n({} rows in {}ms)", rows.row_count, rows.elapsed_ms);
        }
        other => {
            if let Some(message) = other.user_message() {
                println!("{message}");
            }
        }
    }

    Ok(())
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
