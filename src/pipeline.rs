//! Pipeline orchestration
//!
//! The inbound interface the host application calls once per user question:
//! Generator -> Validator -> Executor, sequential and synchronous from the
//! caller's point of view, audited on every branch. Nothing here retries;
//! regenerating after a rejection is a caller-level decision.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::config::{ExecutionLimits, ValidatorConfig};
use crate::db::executor::ExecutionOutcome;
use crate::db::{RowSet, Warehouse};
use crate::error::{ExecutionError, GenerationFailure, Result};
use crate::llm::{ChatTurn, GenerationRequest, GenerationResult, SqlGenerator};
use crate::schema::SchemaSnapshot;
use crate::schema_cache::SchemaCache;
use crate::validator::{ValidationVerdict, Validator, ViolationCode};

/// What the host shows the user for one question.
#[derive(Debug, Clone)]
pub enum ChatReply {
    Rows(RowSet),
    GenerationFailed(GenerationFailure),
    /// The specific code goes to the audit trail; the user-facing text stays
    /// generic so rejection internals don't help an attacker iterate.
    Rejected { code: ViolationCode },
    ExecutionFailed(ExecutionError),
}

impl ChatReply {
    /// Generic end-user message for non-row outcomes.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Rows(_) => None,
            Self::GenerationFailed(_) => {
                Some("I could not produce a query for that question. Please try rephrasing.".to_string())
            }
            Self::Rejected { .. } => {
                Some("The generated query was blocked by safety checks.".to_string())
            }
            Self::ExecutionFailed(ExecutionError::Timeout) => {
                Some("The query took too long and was cancelled. Try narrowing the question.".to_string())
            }
            Self::ExecutionFailed(ExecutionError::Database(_)) => {
                Some("The query failed to run against the warehouse.".to_string())
            }
        }
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub audit_id: Uuid,
    /// False when the audit write failed; the outcome itself is unaffected.
    pub audit_logged: bool,
    /// The SQL shown alongside the answer, when generation produced any.
    pub sql: Option<String>,
    pub tokens_used: u32,
    pub reply: ChatReply,
}

pub struct ChatPipeline {
    generator: Arc<dyn SqlGenerator>,
    warehouse: Arc<dyn Warehouse>,
    audit: Arc<dyn AuditSink>,
    validator: Validator,
    schema_cache: SchemaCache,
    limits: ExecutionLimits,
}

impl ChatPipeline {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        warehouse: Arc<dyn Warehouse>,
        audit: Arc<dyn AuditSink>,
        validator_config: ValidatorConfig,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            generator,
            warehouse,
            audit,
            validator: Validator::new(validator_config),
            schema_cache: SchemaCache::new(),
            limits,
        }
    }

    /// Explicitly refresh the schema snapshot from the warehouse catalog.
    pub async fn refresh_schema(&self) -> Result<Arc<SchemaSnapshot>> {
        self.schema_cache.capture(self.warehouse.as_ref()).await
    }

    /// The snapshot the generator and validator currently see.
    pub fn schema(&self) -> Arc<SchemaSnapshot> {
        self.schema_cache.current()
    }

    /// Answer one natural-language question. Always writes one audit record,
    /// regardless of where the request terminated.
    pub async fn answer(&self, question: &str, history: &[ChatTurn], actor: &str) -> ChatAnswer {
        let started = Instant::now();
        let mut record = AuditRecord::new(actor, question);
        let snapshot = self.schema_cache.current();

        let request = GenerationRequest {
            question,
            history,
            schema: &snapshot,
        };

        let (reply, sql) = match self.generator.generate(&request).await {
            GenerationResult::Failure(failure) => {
                record.outcome = format!("GENERATION_FAILED: {failure}");
                (ChatReply::GenerationFailed(failure), None)
            }
            GenerationResult::Success { sql, tokens_used } => {
                record.tokens_used = tokens_used;
                record.candidate_sql = Some(sql.clone());

                let verdict = self.validator.validate_with_schema(&sql, Some(&snapshot));
                record.verdict = Some(verdict.summary());

                match verdict {
                    ValidationVerdict::Rejected { code, detail } => {
                        warn!(%code, %detail, "candidate SQL rejected");
                        record.outcome = format!("REJECTED {code}");
                        (ChatReply::Rejected { code }, Some(sql))
                    }
                    ValidationVerdict::Accepted(validated) => {
                        let outcome = self.warehouse.execute(&validated, &self.limits).await;
                        record.outcome = outcome.summary();
                        let sql = validated.as_str().to_string();
                        let reply = match outcome {
                            ExecutionOutcome::Rows(rows) => ChatReply::Rows(rows),
                            ExecutionOutcome::Error(e) => ChatReply::ExecutionFailed(e),
                        };
                        (reply, Some(sql))
                    }
                }
            }
        };

        record.elapsed_ms = started.elapsed().as_millis() as u64;

        // A failed audit write is reported separately; it never masks or
        // replaces the pipeline outcome.
        let audit_logged = match self.audit.record(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(audit_id = %record.id, "audit write failed: {e}");
                false
            }
        };

        info!(
            audit_id = %record.id,
            outcome = %record.outcome,
            elapsed_ms = record.elapsed_ms,
            "pipeline finished"
        );

        ChatAnswer {
            audit_id: record.id,
            audit_logged,
            sql,
            tokens_used: record.tokens_used,
            reply,
        }
    }
}
