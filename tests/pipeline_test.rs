//! End-to-end pipeline tests with a deterministic generator and warehouse.
//!
//! The security-relevant properties live here: the executor is never reached
//! without an accepted verdict, every branch is audited, and audit failures
//! never change the outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use queryguard::audit::{AuditRecord, AuditSink, MemoryAuditSink};
use queryguard::config::{ExecutionLimits, ValidatorConfig};
use queryguard::db::executor::ExecutionOutcome;
use queryguard::db::{RowSet, Warehouse};
use queryguard::error::{ExecutionError, GenerationFailure, GuardError};
use queryguard::llm::{GenerationRequest, GenerationResult, SqlGenerator};
use queryguard::pipeline::{ChatPipeline, ChatReply};
use queryguard::schema::{ColumnSchema, TableSchema};
use queryguard::validator::{ValidatedSql, ViolationCode};

struct ScriptedGenerator {
    result: GenerationResult,
}

#[async_trait]
impl SqlGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest<'_>) -> GenerationResult {
        self.result.clone()
    }
}

fn sql_generator(sql: &str) -> Arc<ScriptedGenerator> {
    Arc::new(ScriptedGenerator {
        result: GenerationResult::Success {
            sql: sql.to_string(),
            tokens_used: 17,
        },
    })
}

/// Warehouse fake: one `orders` table, `available_rows` rows of one column,
/// counts how often `execute` is reached.
struct FakeWarehouse {
    executions: AtomicUsize,
    available_rows: usize,
    timeout: bool,
}

impl FakeWarehouse {
    fn new(available_rows: usize) -> Self {
        Self {
            executions: AtomicUsize::new(0),
            available_rows,
            timeout: false,
        }
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn introspect(&self) -> queryguard::Result<Vec<TableSchema>> {
        Ok(vec![TableSchema {
            name: "warehouse.orders".to_string(),
            columns: vec![ColumnSchema {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
                is_nullable: false,
                default: None,
            }],
        }])
    }

    async fn execute(&self, _sql: &ValidatedSql, limits: &ExecutionLimits) -> ExecutionOutcome {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.timeout {
            return ExecutionOutcome::Error(ExecutionError::Timeout);
        }

        let returned = self.available_rows.min(limits.max_rows);
        let rows: Vec<Vec<serde_json::Value>> = (0..returned)
            .map(|i| vec![serde_json::Value::Number((i as u64).into())])
            .collect();
        ExecutionOutcome::Rows(RowSet {
            columns: vec!["id".to_string()],
            rows,
            row_count: returned,
            truncated: self.available_rows > limits.max_rows,
            elapsed_ms: 1,
        })
    }
}

struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn record(&self, _record: &AuditRecord) -> queryguard::Result<()> {
        Err(GuardError::Audit("sink unavailable".to_string()))
    }
}

fn pipeline(
    generator: Arc<dyn SqlGenerator>,
    warehouse: Arc<FakeWarehouse>,
    sink: Arc<dyn AuditSink>,
    limits: ExecutionLimits,
) -> ChatPipeline {
    ChatPipeline::new(
        generator,
        warehouse,
        sink,
        ValidatorConfig::default(),
        limits,
    )
}

#[tokio::test]
async fn accepted_query_returns_rows_and_is_audited() {
    let warehouse = Arc::new(FakeWarehouse::new(1));
    let sink = Arc::new(MemoryAuditSink::new());
    let pipe = pipeline(
        sql_generator("SELECT count(*) FROM orders WHERE created_at > '2024-01-01'"),
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        ExecutionLimits::default(),
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("how many orders this year?", &[], "alice").await;

    assert!(matches!(answer.reply, ChatReply::Rows(ref rows) if rows.row_count == 1));
    assert_eq!(
        answer.sql.as_deref(),
        Some("SELECT count(*) FROM orders WHERE created_at > '2024-01-01'")
    );
    assert_eq!(answer.tokens_used, 17);
    assert!(answer.audit_logged);
    assert_eq!(warehouse.executions(), 1);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].actor, "alice");
    assert_eq!(records[0].verdict.as_deref(), Some("ACCEPTED"));
    assert!(records[0].outcome.starts_with("ROWS 1"));
}

#[tokio::test]
async fn rejected_query_never_reaches_the_warehouse() {
    let warehouse = Arc::new(FakeWarehouse::new(1));
    let sink = Arc::new(MemoryAuditSink::new());
    let pipe = pipeline(
        sql_generator("DROP TABLE orders"),
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        ExecutionLimits::default(),
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("drop everything", &[], "mallory").await;

    match answer.reply {
        ChatReply::Rejected { code } => {
            assert!(matches!(
                code,
                ViolationCode::NotSelect | ViolationCode::ForbiddenKeyword
            ));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(warehouse.executions(), 0);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].outcome.starts_with("REJECTED"));
    assert_eq!(records[0].candidate_sql.as_deref(), Some("DROP TABLE orders"));
}

#[tokio::test]
async fn unknown_table_is_rejected_via_the_snapshot() {
    let warehouse = Arc::new(FakeWarehouse::new(1));
    let sink = Arc::new(MemoryAuditSink::new());
    let pipe = pipeline(
        sql_generator("SELECT * FROM pg_catalog.pg_shadow"),
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        ExecutionLimits::default(),
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("show me the users table", &[], "mallory").await;

    assert!(matches!(
        answer.reply,
        ChatReply::Rejected {
            code: ViolationCode::UnknownIdentifier
        }
    ));
    assert_eq!(warehouse.executions(), 0);
}

#[tokio::test]
async fn generation_failure_is_audited_without_execution() {
    let warehouse = Arc::new(FakeWarehouse::new(1));
    let sink = Arc::new(MemoryAuditSink::new());
    let generator = Arc::new(ScriptedGenerator {
        result: GenerationResult::Failure(GenerationFailure::Timeout),
    });
    let pipe = pipeline(
        generator,
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        ExecutionLimits::default(),
    );

    let answer = pipe.answer("anything", &[], "alice").await;

    assert!(matches!(
        answer.reply,
        ChatReply::GenerationFailed(GenerationFailure::Timeout)
    ));
    assert!(answer.sql.is_none());
    assert_eq!(warehouse.executions(), 0);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].outcome.starts_with("GENERATION_FAILED"));
    assert!(records[0].candidate_sql.is_none());
}

#[tokio::test]
async fn row_cap_truncates_and_flags() {
    let warehouse = Arc::new(FakeWarehouse::new(500));
    let sink = Arc::new(MemoryAuditSink::new());
    let limits = ExecutionLimits {
        statement_timeout_ms: 1_000,
        max_rows: 100,
    };
    let pipe = pipeline(
        sql_generator("SELECT id FROM orders"),
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        limits,
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("list all orders", &[], "alice").await;

    match answer.reply {
        ChatReply::Rows(rows) => {
            assert_eq!(rows.rows.len(), 100);
            assert!(rows.truncated);
        }
        other => panic!("expected rows, got {other:?}"),
    }
    assert!(sink.records()[0].outcome.contains("truncated"));
}

#[tokio::test]
async fn timeout_surfaces_as_execution_error() {
    let mut inner = FakeWarehouse::new(1);
    inner.timeout = true;
    let warehouse = Arc::new(inner);
    let sink = Arc::new(MemoryAuditSink::new());
    let pipe = pipeline(
        sql_generator("SELECT id FROM orders"),
        Arc::clone(&warehouse),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        ExecutionLimits::default(),
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("slow question", &[], "alice").await;

    assert!(matches!(
        answer.reply,
        ChatReply::ExecutionFailed(ExecutionError::Timeout)
    ));
    assert_eq!(sink.records()[0].outcome, "TIMEOUT");
}

#[tokio::test]
async fn audit_failure_never_masks_the_outcome() {
    let warehouse = Arc::new(FakeWarehouse::new(1));
    let pipe = pipeline(
        sql_generator("SELECT count(*) FROM orders"),
        Arc::clone(&warehouse),
        Arc::new(FailingSink),
        ExecutionLimits::default(),
    );
    pipe.refresh_schema().await.unwrap();

    let answer = pipe.answer("how many orders?", &[], "alice").await;

    assert!(matches!(answer.reply, ChatReply::Rows(_)));
    assert!(!answer.audit_logged);
}

#[tokio::test]
async fn user_messages_stay_generic_for_rejections() {
    let reply = ChatReply::Rejected {
        code: ViolationCode::ForbiddenFunction,
    };
    let message = reply.user_message().unwrap();
    assert!(!message.contains("FORBIDDEN"));
    assert!(!message.contains("function"));
}
