//! # ADIM
//!
//! Automatic Database Index Management: workload-driven index advice with
//! prediction-driven index materialization and eviction.
//!
//! ## Components
//!
//! - [`matcher`]: statement logs → occurrences of tracked queries
//! - [`scorer`]: execution statistics → ranked, admitted tracked queries
//! - [`advisor`]: SQL text → `CREATE INDEX` candidates
//! - [`scheduler`]: occurrence history → forecasts, eviction, audit log
//!
//! Supporting modules:
//!
//! - [`store`]: SQLite metadata store
//! - [`sources`]: collaborator traits (logs, statistics, DDL)
//! - [`engine`]: facade wiring everything together
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use adim::config::AdimConfig;
//! use adim::engine::AdimEngine;
//! use adim::sources::{DirectoryLogSource, ScriptSchemaExecutor, SnapshotStatistics};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdimConfig::load_default();
//!     let statistics = SnapshotStatistics::load(Path::new("stats.json")).await?;
//!     let executor = ScriptSchemaExecutor::new("adim-ddl.sql");
//!     let engine = AdimEngine::open(config, Arc::new(statistics), Arc::new(executor))?;
//!
//!     // Admit the heaviest statements with their index candidates
//!     let tracked = engine.run_diagnostics().await?;
//!     println!("Tracking {} queries", tracked.len());
//!
//!     // Record executions seen in the statement log
//!     let logs = DirectoryLogSource::new("./logs", "log");
//!     engine.process_log_source(&logs).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod advisor;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod scheduler;
pub mod scorer;
pub mod sources;
pub mod store;

pub use advisor::{CreateIndexStatement, IndexAdvisor, IndexMethod, QueryShape, TableUsage};

pub use config::{generate_default_config, AdimConfig, ConfigError};

pub use engine::{AdimEngine, IndexStatus};

pub use error::{AdimError, AdimResult, Stage};

pub use matcher::{normalize, similarity, LogBatch, LogMatcher};

pub use scheduler::{
    ArtifactStore, ForecastArtifact, Forecaster, LifecycleScheduler, LifecycleState, SkipReason,
    StoredArtifact, SweepReport,
};

pub use scorer::WorkloadScorer;

pub use sources::{
    DirectoryLogSource, LogSource, SchemaExecutor, ScriptSchemaExecutor, SnapshotStatistics,
    SourceError, StatRow, StatisticsSource,
};

pub use store::{
    ForecastUpdate, MaintenanceLog, MetadataStore, Occurrence, SqliteStore, StoreError,
    TrackedQuery,
};
