//! Shared cache for the current schema snapshot
//!
//! The cache is the only shared mutable state in the pipeline. Refresh is
//! explicit: `capture` builds a complete snapshot off to the side and then
//! swaps the shared `Arc`, so concurrent readers always observe either the
//! old snapshot or the new one, never a partial state. A failed capture
//! leaves the previous snapshot untouched.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::db::Warehouse;
use crate::error::Result;
use crate::schema::SchemaSnapshot;

#[derive(Debug)]
pub struct SchemaCache {
    current: RwLock<Arc<SchemaSnapshot>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(SchemaSnapshot::empty())),
        }
    }

    /// Most recently captured snapshot, or the empty snapshot if none exists.
    ///
    /// Cheap: clones the `Arc` under a read lock held only for the clone.
    pub fn current(&self) -> Arc<SchemaSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => {
                // A panicking writer never leaves a torn value behind because
                // the swap is a single assignment.
                warn!("schema cache lock poisoned, serving last snapshot");
                Arc::clone(&poisoned.into_inner())
            }
        }
    }

    /// Introspect the warehouse catalog and atomically replace the cached
    /// snapshot. On failure the previous snapshot stays in place.
    pub async fn capture(&self, warehouse: &dyn Warehouse) -> Result<Arc<SchemaSnapshot>> {
        let tables = warehouse.introspect().await?;
        let snapshot = Arc::new(SchemaSnapshot::new(tables));

        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }

        info!(
            tables = snapshot.table_count(),
            "schema snapshot refreshed"
        );
        Ok(snapshot)
    }

    /// Install a snapshot built elsewhere (tests, preloaded schema files).
    pub fn replace(&self, snapshot: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use crate::db::executor::ExecutionOutcome;
    use crate::error::GuardError;
    use crate::schema::TableSchema;
    use crate::validator::ValidatedSql;
    use async_trait::async_trait;

    struct FlakyWarehouse {
        fail: bool,
    }

    #[async_trait]
    impl Warehouse for FlakyWarehouse {
        async fn introspect(&self) -> Result<Vec<TableSchema>> {
            if self.fail {
                Err(GuardError::SchemaIntrospection(
                    "connection dropped".to_string(),
                ))
            } else {
                Ok(vec![TableSchema {
                    name: "warehouse.orders".to_string(),
                    columns: Vec::new(),
                }])
            }
        }

        async fn execute(
            &self,
            _sql: &ValidatedSql,
            _limits: &ExecutionLimits,
        ) -> ExecutionOutcome {
            unreachable!("introspection-only fake")
        }
    }

    #[tokio::test]
    async fn capture_replaces_snapshot() {
        let cache = SchemaCache::new();
        assert!(cache.current().is_empty());

        cache
            .capture(&FlakyWarehouse { fail: false })
            .await
            .unwrap();
        assert!(cache.current().contains_table("orders"));
    }

    #[tokio::test]
    async fn failed_capture_keeps_previous_snapshot() {
        let cache = SchemaCache::new();
        cache
            .capture(&FlakyWarehouse { fail: false })
            .await
            .unwrap();
        let before = cache.current();

        let err = cache.capture(&FlakyWarehouse { fail: true }).await;
        assert!(matches!(err, Err(GuardError::SchemaIntrospection(_))));

        let after = cache.current();
        assert!(Arc::ptr_eq(&before, &after));
    }
}
