//! Warehouse catalog introspection
//!
//! Reads table/column structure from information_schema. Only base tables of
//! the configured schema are exposed to the generator.

use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::schema::{ColumnSchema, TableSchema};

const CATALOG_QUERY: &str = r#"
    SELECT
        t.table_name,
        c.column_name,
        c.data_type,
        c.is_nullable,
        c.column_default
    FROM information_schema.tables t
    JOIN information_schema.columns c
      ON t.table_schema = c.table_schema
     AND t.table_name = c.table_name
    WHERE t.table_schema = $1
      AND t.table_type = 'BASE TABLE'
    ORDER BY t.table_name, c.ordinal_position
"#;

/// Fetch the catalog for one schema, tables in name order, columns in
/// ordinal order.
pub async fn fetch_tables(pool: &PgPool, schema_name: &str) -> Result<Vec<TableSchema>> {
    let rows = sqlx::query(CATALOG_QUERY)
        .bind(schema_name)
        .fetch_all(pool)
        .await
        .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?;

    let mut tables: Vec<TableSchema> = Vec::new();
    for row in rows {
        let table_name: String = row
            .try_get("table_name")
            .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?;
        let column = ColumnSchema {
            name: row
                .try_get("column_name")
                .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?,
            data_type: row
                .try_get("data_type")
                .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?,
            is_nullable: row
                .try_get::<String, _>("is_nullable")
                .map(|v| v == "YES")
                .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?,
            default: row
                .try_get("column_default")
                .map_err(|e| GuardError::SchemaIntrospection(e.to_string()))?,
        };

        let qualified = format!("{schema_name}.{table_name}");
        match tables.last_mut() {
            Some(table) if table.name == qualified => table.columns.push(column),
            _ => tables.push(TableSchema {
                name: qualified,
                columns: vec![column],
            }),
        }
    }

    debug!(tables = tables.len(), schema = schema_name, "catalog fetched");
    Ok(tables)
}
