//! Configuration surface for the pipeline core
//!
//! The library takes explicit config structs; the binary fills them from
//! environment variables (loaded via dotenv) and CLI flags.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{GuardError, Result};

lazy_static! {
    /// Mutating/DDL keywords that are never allowed in a candidate query.
    pub static ref DEFAULT_FORBIDDEN_KEYWORDS: HashSet<String> = [
        "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE",
        "GRANT", "REVOKE", "EXECUTE", "EXEC", "CALL", "MERGE", "UPSERT",
        "REPLACE", "RENAME", "COPY", "VACUUM",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    /// Built-in functions with file, OS, session or privilege reach.
    pub static ref DEFAULT_FORBIDDEN_FUNCTIONS: HashSet<String> = [
        "PG_READ_FILE", "PG_LS_DIR", "PG_STAT_FILE", "PG_READ_BINARY_FILE",
        "SYSTEM", "EXEC", "EVAL", "SHELL_EXEC", "PASSTHRU",
        "DBLINK", "LO_IMPORT", "LO_EXPORT", "PG_SLEEP", "SET_CONFIG",
        "PG_TERMINATE_BACKEND",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
}

/// Knobs for the safety validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Denylisted statement keywords, matched as whole tokens.
    pub forbidden_keywords: HashSet<String>,

    /// Denylisted function names, matched as a token followed by `(`.
    pub forbidden_functions: HashSet<String>,

    /// Whether referenced tables must exist in the schema snapshot.
    pub check_identifiers: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            forbidden_keywords: DEFAULT_FORBIDDEN_KEYWORDS.clone(),
            forbidden_functions: DEFAULT_FORBIDDEN_FUNCTIONS.clone(),
            check_identifiers: true,
        }
    }
}

/// Resource bounds applied to every warehouse execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Server-side statement timeout in milliseconds.
    pub statement_timeout_ms: u64,

    /// Maximum number of rows returned to the caller.
    pub max_rows: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            statement_timeout_ms: 30_000,
            max_rows: 100,
        }
    }
}

/// Settings for the text-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Deadline for one generation call, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Warehouse connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub database_url: String,
    /// Schema whose base tables are introspected and exposed to the model.
    pub schema_name: String,
    pub max_connections: u32,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            schema_name: "warehouse".to_string(),
            max_connections: 10,
        }
    }
}

/// Full configuration for the pipeline core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub validator: ValidatorConfig,
    pub limits: ExecutionLimits,
    pub generator: GeneratorConfig,
    pub warehouse: WarehouseConfig,
}

impl CoreConfig {
    /// Build a config from environment variables.
    ///
    /// `OPENAI_API_KEY` and `WAREHOUSE_DATABASE_URL` are required; everything
    /// else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.generator.api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GuardError::Config("OPENAI_API_KEY is not set".to_string()))?;
        config.warehouse.database_url = std::env::var("WAREHOUSE_DATABASE_URL")
            .map_err(|_| GuardError::Config("WAREHOUSE_DATABASE_URL is not set".to_string()))?;

        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.generator.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.generator.base_url = base_url;
        }
        if let Ok(schema) = std::env::var("WAREHOUSE_SCHEMA") {
            config.warehouse.schema_name = schema;
        }
        if let Ok(timeout) = std::env::var("QUERY_TIMEOUT_MS") {
            config.limits.statement_timeout_ms = timeout
                .parse()
                .map_err(|_| GuardError::Config("QUERY_TIMEOUT_MS must be an integer".to_string()))?;
        }
        if let Ok(max_rows) = std::env::var("QUERY_MAX_ROWS") {
            config.limits.max_rows = max_rows
                .parse()
                .map_err(|_| GuardError::Config("QUERY_MAX_ROWS must be an integer".to_string()))?;
        }

        Ok(config)
    }
}
