//! Warehouse access: connection pool, catalog introspection, bounded execution
//!
//! The `Warehouse` trait is the seam between the pipeline and PostgreSQL so
//! the security logic can be tested without a live database.

pub mod connection;
pub mod executor;
pub mod introspect;

use async_trait::async_trait;

use crate::config::ExecutionLimits;
use crate::error::Result;
use crate::schema::TableSchema;
use crate::validator::ValidatedSql;
use executor::ExecutionOutcome;

pub use connection::init_pool;
pub use executor::{PgWarehouse, RowSet};

/// Catalog introspection plus bounded read-only execution.
///
/// `execute` only accepts [`ValidatedSql`], which can only be produced by the
/// validator — there is no code path that runs unvalidated text.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn introspect(&self) -> Result<Vec<TableSchema>>;

    async fn execute(&self, sql: &ValidatedSql, limits: &ExecutionLimits) -> ExecutionOutcome;
}
