//! Audit log sink
//!
//! Every pipeline invocation produces exactly one audit record, no matter
//! where the request terminated. Storage and retention belong to the host;
//! the core only appends through the `AuditSink` seam. A sink failure is
//! reported separately and never changes the pipeline outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{GuardError, Result};

/// Write-once record of one question flowing through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor: String,
    pub question: String,
    /// Empty when generation failed before producing SQL.
    pub candidate_sql: Option<String>,
    /// Validation verdict summary; `None` when validation was never reached.
    pub verdict: Option<String>,
    /// Where and how the request terminated.
    pub outcome: String,
    pub tokens_used: u32,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(actor: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            question: question.into(),
            candidate_sql: None,
            verdict: None,
            outcome: String::new(),
            tokens_used: 0,
            elapsed_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Append-only sink the core writes one record per invocation to.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Sink backed by a `query_audit_log` table in the application database.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_audit_log
                (id, actor, question, candidate_sql, verdict, outcome,
                 tokens_used, elapsed_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.actor)
        .bind(&record.question)
        .bind(&record.candidate_sql)
        .bind(&record.verdict)
        .bind(&record.outcome)
        .bind(record.tokens_used as i64)
        .bind(record.elapsed_ms as i64)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GuardError::Audit(e.to_string()))?;

        Ok(())
    }
}

/// In-process sink for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| GuardError::Audit("audit sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
