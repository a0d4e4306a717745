//! Collaborator Interfaces
//!
//! The engine never talks to the observed database or the log storage
//! directly. It goes through these traits:
//!
//! - `LogSource`: raw statement logs (list, read, delete)
//! - `StatisticsSource`: per-statement execution statistics and index catalog
//! - `SchemaExecutor`: DDL against the observed database
//!
//! Shipped implementations:
//! - `DirectoryLogSource`: `*.log` files in a directory
//! - `ScriptSchemaExecutor`: appends DDL to a script instead of executing it
//! - `SnapshotStatistics`: statistics and index catalog from a JSON export

mod directory;
mod script;
mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use directory::DirectoryLogSource;
pub use script::ScriptSchemaExecutor;
pub use snapshot::{SnapshotStatistics, StatisticsSnapshot};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Aggregate statistics of one statement as reported by the observed
/// database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    /// Source-specific statement identifier, if the source has one
    pub query_id: Option<String>,
    pub query: String,
    pub total_exec_time: f64,
    pub mean_exec_time: f64,
    pub calls: i64,
    pub shared_blks_read: i64,
    pub temp_blks_written: i64,
}

/// An index that already exists in the observed database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    /// Full `CREATE INDEX` text as reported by the catalog
    pub definition: String,
}

/// Errors reported by collaborators
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Raw statement log storage
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Available log names, in processing order
    async fn list(&self) -> Result<Vec<String>, SourceError>;

    async fn read(&self, name: &str) -> Result<String, SourceError>;

    async fn delete(&self, name: &str) -> Result<(), SourceError>;
}

/// Execution statistics and index catalog of the observed database
#[async_trait]
pub trait StatisticsSource: Send + Sync {
    fn name(&self) -> &str;

    /// One row per distinct statement
    async fn statement_stats(&self) -> Result<Vec<StatRow>, SourceError>;

    /// A single statement by its source identifier
    async fn statement_stats_by_id(&self, query_id: &str) -> Result<Option<StatRow>, SourceError>;

    /// Existing index definitions on `table`
    async fn index_definitions(&self, table: &str) -> Result<Vec<IndexDefinition>, SourceError>;

    /// Whether an index with this name currently exists
    async fn index_exists(&self, name: &str) -> Result<bool, SourceError>;
}

/// DDL against the observed database
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ddl: &str) -> Result<(), SourceError>;
}
