//! Warehouse connection pool management using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::WarehouseConfig;
use crate::error::{GuardError, Result};

/// Build the warehouse connection pool and verify connectivity.
pub async fn init_pool(config: &WarehouseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await
        .map_err(|e| GuardError::Config(format!("failed to connect to warehouse: {e}")))?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| GuardError::Config(format!("warehouse connectivity check failed: {e}")))?;

    info!(
        schema = %config.schema_name,
        max_connections = config.max_connections,
        "warehouse pool initialized"
    );
    Ok(pool)
}
