//! In-memory collaborators for unit tests

use crate::sources::{IndexDefinition, SchemaExecutor, SourceError, StatRow, StatisticsSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub(crate) fn stat_row(query: &str, total: f64, mean: f64, calls: i64) -> StatRow {
    StatRow {
        query_id: None,
        query: query.to_string(),
        total_exec_time: total,
        mean_exec_time: mean,
        calls,
        shared_blks_read: 0,
        temp_blks_written: 0,
    }
}

/// Statistics source with fixed rows and a mutable index catalog
#[derive(Default)]
pub(crate) struct FakeStatistics {
    pub rows: Vec<StatRow>,
    pub definitions: HashMap<String, Vec<IndexDefinition>>,
    pub live_indexes: Mutex<Vec<String>>,
    pub unavailable: bool,
}

impl FakeStatistics {
    pub fn with_rows(rows: Vec<StatRow>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }
}

#[async_trait]
impl StatisticsSource for FakeStatistics {
    fn name(&self) -> &str {
        "fake-statistics"
    }

    async fn statement_stats(&self) -> Result<Vec<StatRow>, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        Ok(self.rows.clone())
    }

    async fn statement_stats_by_id(&self, query_id: &str) -> Result<Option<StatRow>, SourceError> {
        Ok(self
            .rows
            .iter()
            .find(|row| row.query_id.as_deref() == Some(query_id))
            .cloned())
    }

    async fn index_definitions(&self, table: &str) -> Result<Vec<IndexDefinition>, SourceError> {
        Ok(self.definitions.get(table).cloned().unwrap_or_default())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SourceError> {
        Ok(self
            .live_indexes
            .lock()
            .map(|live| live.iter().any(|n| n == name))
            .unwrap_or(false))
    }
}

/// Records every statement; fails those containing `fail_on`
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    pub executed: Mutex<Vec<String>>,
    pub fail_on: Option<String>,
}

impl RecordingExecutor {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            fail_on: Some(pattern.to_string()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SchemaExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, ddl: &str) -> Result<(), SourceError> {
        if let Some(pattern) = &self.fail_on {
            if ddl.contains(pattern.as_str()) {
                return Err(SourceError::Rejected(format!("refused: {}", ddl)));
            }
        }
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(ddl.to_string());
        }
        Ok(())
    }
}
