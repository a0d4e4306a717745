//! Statistics from an exported JSON snapshot
//!
//! ```json
//! {
//!   "statements": [{ "query_id": "42", "query": "SELECT ...", "total_exec_time": 1.5, ... }],
//!   "indexes": [{ "name": "orders_pkey", "definition": "CREATE UNIQUE INDEX orders_pkey ON public.orders USING btree (id)" }]
//! }
//! ```
//!
//! Useful for offline analysis of a `pg_stat_statements` / `pg_indexes`
//! export. Index existence is answered from the snapshot's index list.

use crate::advisor::definition_table;
use crate::sources::{IndexDefinition, SourceError, StatRow, StatisticsSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsSnapshot {
    #[serde(default)]
    pub statements: Vec<StatRow>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStatistics {
    snapshot: StatisticsSnapshot,
}

impl SnapshotStatistics {
    pub fn new(snapshot: StatisticsSnapshot) -> Self {
        Self { snapshot }
    }

    pub async fn load(path: &Path) -> Result<Self, SourceError> {
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: StatisticsSnapshot = serde_json::from_str(&content)
            .map_err(|e| SourceError::Rejected(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            path = %path.display(),
            statements = snapshot.statements.len(),
            indexes = snapshot.indexes.len(),
            "Loaded statistics snapshot"
        );
        Ok(Self::new(snapshot))
    }
}

#[async_trait]
impl StatisticsSource for SnapshotStatistics {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn statement_stats(&self) -> Result<Vec<StatRow>, SourceError> {
        Ok(self.snapshot.statements.clone())
    }

    async fn statement_stats_by_id(&self, query_id: &str) -> Result<Option<StatRow>, SourceError> {
        Ok(self
            .snapshot
            .statements
            .iter()
            .find(|row| row.query_id.as_deref() == Some(query_id))
            .cloned())
    }

    async fn index_definitions(&self, table: &str) -> Result<Vec<IndexDefinition>, SourceError> {
        let table = table.to_lowercase();
        Ok(self
            .snapshot
            .indexes
            .iter()
            .filter(|index| definition_table(&index.definition).as_deref() == Some(table.as_str()))
            .cloned()
            .collect())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SourceError> {
        Ok(self.snapshot.indexes.iter().any(|index| index.name == name))
    }
}
