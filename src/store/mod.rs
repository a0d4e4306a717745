//! ADIM Metadata Store
//!
//! The engine's own bookkeeping, kept apart from the observed database:
//!
//! - **types**: TrackedQuery, Occurrence, MaintenanceLog, ForecastUpdate
//! - **sqlite**: `SqliteStore`, the rusqlite-backed implementation
//! - **error**: Error types
//!
//! # Tables
//!
//! ```text
//! tc_queries ──┬── query_logs              (occurrences, time series)
//!              ├── index_maintenance_logs  (append-only audit)
//!              └── forecast_artifacts      (trained predictors)
//! ```
//!
//! Deleting a tracked query cascades to every dependent row.

pub mod error;
pub mod sqlite;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteStore;
pub use types::{
    ForecastUpdate, MaintenanceLog, NewOccurrence, Occurrence, QueryMetrics, TrackedQuery,
    TrackedQueryUpsert,
};

use chrono::{DateTime, Utc};

/// Persistence for tracked queries and their dependent rows
///
/// Every method that writes more than one row does so in a single
/// transaction.
pub trait MetadataStore: Send + Sync {
    /// All tracked queries ordered by id
    fn tracked_queries(&self) -> StoreResult<Vec<TrackedQuery>>;

    /// Tracked queries the lifecycle scheduler manages
    fn auto_indexed_queries(&self) -> StoreResult<Vec<TrackedQuery>>;

    fn tracked_query(&self, id: i64) -> StoreResult<Option<TrackedQuery>>;

    /// Insert or update by exact canonical text; returns rows in input order
    fn upsert_tracked_queries(
        &self,
        entries: &[TrackedQueryUpsert],
    ) -> StoreResult<Vec<TrackedQuery>>;

    /// Delete a tracked query and everything that references it
    fn delete_tracked_query(&self, id: i64) -> StoreResult<bool>;

    fn update_indexes(&self, id: i64, indexes: &[String]) -> StoreResult<bool>;

    fn set_auto_indexing(&self, id: i64, enabled: bool) -> StoreResult<bool>;

    /// Store a batch of occurrences atomically
    fn insert_occurrences(&self, occurrences: &[NewOccurrence]) -> StoreResult<usize>;

    /// Most recent occurrences, newest first
    fn recent_occurrences(&self, id: i64, limit: usize) -> StoreResult<Vec<Occurrence>>;

    /// Occurrences at or after `since`, oldest first, optionally filtered
    /// by the `optimized` flag
    fn occurrences_since(
        &self,
        id: i64,
        since: DateTime<Utc>,
        optimized: Option<bool>,
    ) -> StoreResult<Vec<Occurrence>>;

    /// Eviction bookkeeping, atomically: drop log row, the new forecast and
    /// the `optimized` flag on the given occurrences
    fn record_forecast(
        &self,
        id: i64,
        at: DateTime<Utc>,
        next_time_execution: DateTime<Utc>,
        optimized: &[i64],
    ) -> StoreResult<MaintenanceLog>;

    /// Materialization bookkeeping: creation log row plus build time, atomically
    fn record_materialization(
        &self,
        id: i64,
        at: DateTime<Utc>,
        elapsed_secs: f64,
    ) -> StoreResult<MaintenanceLog>;

    fn append_maintenance_log(
        &self,
        id: i64,
        at: DateTime<Utc>,
        index_created: bool,
    ) -> StoreResult<MaintenanceLog>;

    /// Audit rows of one tracked query, oldest first
    fn maintenance_logs(&self, id: i64) -> StoreResult<Vec<MaintenanceLog>>;

    /// Forecasts that lie after `after`, soonest first
    fn scheduled_forecasts(&self, after: DateTime<Utc>) -> StoreResult<Vec<ForecastUpdate>>;
}
