//! Error taxonomy for the query pipeline
//!
//! Each branch corresponds to one stage of the pipeline, so the audit trail
//! and the caller can always tell where a request terminated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the generator failed to produce a candidate SQL string.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationFailure {
    #[error("generation service error: {0}")]
    ServiceError(String),

    #[error("generation timed out")]
    Timeout,

    #[error("generation service returned no SQL")]
    EmptyResponse,
}

/// Why an accepted query failed at the warehouse.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("query exceeded the statement timeout")]
    Timeout,

    #[error("database error: {0}")]
    Database(String),
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("query rejected ({code}): {detail}")]
    Validation {
        code: crate::validator::ViolationCode,
        detail: String,
    },

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("schema introspection failed: {0}")]
    SchemaIntrospection(String),

    #[error("audit sink error: {0}")]
    Audit(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GuardError>;
