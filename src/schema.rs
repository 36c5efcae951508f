//! Warehouse schema snapshots
//!
//! A snapshot is an immutable point-in-time capture of the warehouse's
//! table/column structure. It is built wholesale by the cache and shared by
//! reference; nothing mutates a snapshot in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
}

/// One warehouse table with its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema-qualified name, e.g. `warehouse.dim_player`.
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Immutable capture of the warehouse catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub captured_at: DateTime<Utc>,
    /// Tables in catalog order.
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// The well-defined snapshot returned before any capture has happened.
    pub fn empty() -> Self {
        Self {
            captured_at: DateTime::<Utc>::MIN_UTC,
            tables: Vec::new(),
        }
    }

    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            captured_at: Utc::now(),
            tables,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Case-insensitive lookup that accepts either the schema-qualified name
    /// or the bare table name.
    pub fn contains_table(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        self.tables.iter().any(|t| {
            let full = t.name.to_lowercase();
            if full == needle {
                return true;
            }
            match (full.rsplit_once('.'), needle.rsplit_once('.')) {
                (Some((_, bare)), None) => bare == needle,
                (None, Some((_, bare))) => full == bare,
                _ => false,
            }
        })
    }

    /// Render the snapshot as the DATABASE SCHEMA prompt section.
    ///
    /// Mirrors the layout the model was tuned against: one line per column
    /// with type, nullability and default.
    pub fn describe_for_prompt(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "Table: {}", table.name);
            for column in &table.columns {
                let nullable = if column.is_nullable { "NULL" } else { "NOT NULL" };
                let default = column
                    .default
                    .as_deref()
                    .map(|d| format!(" DEFAULT {d}"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  - {}: {} {}{}",
                    column.name, column.data_type, nullable, default
                );
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![TableSchema {
            name: "warehouse.orders".to_string(),
            columns: vec![
                ColumnSchema {
                    name: "order_id".to_string(),
                    data_type: "bigint".to_string(),
                    is_nullable: false,
                    default: None,
                },
                ColumnSchema {
                    name: "created_at".to_string(),
                    data_type: "timestamp".to_string(),
                    is_nullable: true,
                    default: Some("now()".to_string()),
                },
            ],
        }])
    }

    #[test]
    fn lookup_accepts_qualified_and_bare_names() {
        let snap = snapshot();
        assert!(snap.contains_table("warehouse.orders"));
        assert!(snap.contains_table("orders"));
        assert!(snap.contains_table("ORDERS"));
        assert!(!snap.contains_table("users"));
        assert!(!snap.contains_table("other.orders"));
    }

    #[test]
    fn prompt_description_lists_types_and_defaults() {
        let text = snapshot().describe_for_prompt();
        assert!(text.contains("Table: warehouse.orders"));
        assert!(text.contains("order_id: bigint NOT NULL"));
        assert!(text.contains("created_at: timestamp NULL DEFAULT now()"));
    }

    #[test]
    fn empty_snapshot_is_well_defined() {
        let snap = SchemaSnapshot::empty();
        assert!(snap.is_empty());
        assert_eq!(snap.table_count(), 0);
        assert!(!snap.contains_table("anything"));
    }
}
