//! Bounded query executor
//!
//! Runs an accepted query against the warehouse under a server-side
//! statement timeout and a row cap. Read-only is enforced twice: the
//! validator rejects mutating statements, and the transaction is opened in
//! READ ONLY mode so the server refuses writes even if text-level checks
//! were ever bypassed. Raw driver errors never escape this module.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::ExecutionLimits;
use crate::db::{introspect, Warehouse};
use crate::error::{ExecutionError, Result};
use crate::schema::TableSchema;
use crate::validator::ValidatedSql;

/// Postgres error code for a statement cancelled by statement_timeout.
const QUERY_CANCELED: &str = "57014";

/// Structured result of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Set when more rows were available than the configured cap.
    pub truncated: bool,
    pub elapsed_ms: u64,
}

/// Outcome of executing one accepted query.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(RowSet),
    Error(ExecutionError),
}

impl ExecutionOutcome {
    /// One-line summary for the audit trail.
    pub fn summary(&self) -> String {
        match self {
            Self::Rows(rows) if rows.truncated => format!(
                "ROWS {} (truncated) in {}ms",
                rows.row_count, rows.elapsed_ms
            ),
            Self::Rows(rows) => format!("ROWS {} in {}ms", rows.row_count, rows.elapsed_ms),
            Self::Error(ExecutionError::Timeout) => "TIMEOUT".to_string(),
            Self::Error(ExecutionError::Database(detail)) => format!("DATABASE_ERROR: {detail}"),
        }
    }
}

/// PostgreSQL-backed warehouse.
pub struct PgWarehouse {
    pool: PgPool,
    schema_name: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, schema_name: impl Into<String>) -> Self {
        Self {
            pool,
            schema_name: schema_name.into(),
        }
    }

    async fn run(&self, sql: &ValidatedSql, limits: &ExecutionLimits) -> sqlx::Result<RowSet> {
        let mut tx = self.pool.begin().await?;

        // Second enforcement layer after the validator: the server itself
        // refuses writes, and statement_timeout cancels runaway queries on
        // the server instead of abandoning them client-side.
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            limits.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut truncated = false;

        {
            let mut stream = sqlx::query(sql.as_str()).fetch(&mut *tx);
            while let Some(row) = stream.try_next().await? {
                if columns.is_empty() {
                    columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                if rows.len() == limits.max_rows {
                    truncated = true;
                    break;
                }
                rows.push(decode_row(&row));
            }
        }

        // Nothing to commit in a read-only transaction.
        tx.rollback().await.ok();

        let row_count = rows.len();
        Ok(RowSet {
            columns,
            rows,
            row_count,
            truncated,
            elapsed_ms: 0,
        })
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn introspect(&self) -> Result<Vec<TableSchema>> {
        introspect::fetch_tables(&self.pool, &self.schema_name).await
    }

    async fn execute(&self, sql: &ValidatedSql, limits: &ExecutionLimits) -> ExecutionOutcome {
        let started = Instant::now();

        match self.run(sql, limits).await {
            Ok(mut rows) => {
                rows.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    row_count = rows.row_count,
                    truncated = rows.truncated,
                    elapsed_ms = rows.elapsed_ms,
                    "query executed"
                );
                ExecutionOutcome::Rows(rows)
            }
            Err(e) => {
                let error = map_error(e);
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                    "query failed"
                );
                ExecutionOutcome::Error(error)
            }
        }
    }
}

fn map_error(e: sqlx::Error) -> ExecutionError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(QUERY_CANCELED) {
            return ExecutionError::Timeout;
        }
        return ExecutionError::Database(db.message().to_string());
    }
    ExecutionError::Database(e.to_string())
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.len()).map(|idx| decode_value(row, idx)).collect()
}

/// Decode one column into JSON by declared type. Decimals become numbers,
/// dates and timestamps ISO-8601 strings; anything unrecognized falls back
/// to its text form.
fn decode_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();

    match type_name.as_str() {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)).map_or(Value::Null, Value::Bool),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx))
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx))
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx))
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx))
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx))
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        "NUMERIC" => opt(row.try_get::<Option<rust_decimal::Decimal>, _>(idx))
            .map_or(Value::Null, |d| match d.to_f64().and_then(serde_json::Number::from_f64) {
                Some(n) => Value::Number(n),
                None => Value::String(d.to_string()),
            }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            opt(row.try_get::<Option<String>, _>(idx)).map_or(Value::Null, Value::String)
        }
        "DATE" => opt(row.try_get::<Option<chrono::NaiveDate>, _>(idx))
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        "TIME" => opt(row.try_get::<Option<chrono::NaiveTime>, _>(idx))
            .map_or(Value::Null, |t| Value::String(t.to_string())),
        "TIMESTAMP" => opt(row.try_get::<Option<chrono::NaiveDateTime>, _>(idx))
            .map_or(Value::Null, |t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx))
            .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(idx))
            .map_or(Value::Null, |u| Value::String(u.to_string())),
        "JSON" | "JSONB" => {
            opt(row.try_get::<Option<Value>, _>(idx)).unwrap_or(Value::Null)
        }
        _ => opt(row.try_get::<Option<String>, _>(idx)).map_or(Value::Null, Value::String),
    }
}

fn opt<T>(result: sqlx::Result<Option<T>>) -> Option<T> {
    result.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowset(truncated: bool) -> RowSet {
        RowSet {
            columns: vec!["count".to_string()],
            rows: vec![vec![Value::Number(42.into())]],
            row_count: 1,
            truncated,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn summaries_distinguish_outcomes() {
        assert_eq!(
            ExecutionOutcome::Rows(rowset(false)).summary(),
            "ROWS 1 in 12ms"
        );
        assert_eq!(
            ExecutionOutcome::Rows(rowset(true)).summary(),
            "ROWS 1 (truncated) in 12ms"
        );
        assert_eq!(
            ExecutionOutcome::Error(ExecutionError::Timeout).summary(),
            "TIMEOUT"
        );
        assert!(ExecutionOutcome::Error(ExecutionError::Database("boom".to_string()))
            .summary()
            .starts_with("DATABASE_ERROR"));
    }

    #[test]
    fn rowset_serializes_with_truncation_flag() {
        let json = serde_json::to_value(rowset(true)).unwrap();
        assert_eq!(json["truncated"], Value::Bool(true));
        assert_eq!(json["row_count"], Value::Number(1.into()));
    }
}
