//! queryguard — safety pipeline for LLM-generated SQL
//!
//! Turns a natural-language question into a warehouse query through three
//! stages: schema-aware generation, multi-layer validation, and bounded
//! read-only execution. Every attempt is written to an audit sink.

pub mod audit;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod schema_cache;
pub mod validator;

// Warehouse access (PostgreSQL)
pub mod db;

pub use config::{CoreConfig, ExecutionLimits, ValidatorConfig};
pub use error::{ExecutionError, GenerationFailure, GuardError, Result};
pub use pipeline::{ChatAnswer, ChatPipeline, ChatReply};
pub use validator::{ValidatedSql, ValidationVerdict, Validator, ViolationCode};
