//! Lifecycle Scheduler
//!
//! Decides when the indexes of a tracked query should exist. A sweep walks
//! every query with `auto_indexing` on:
//!
//! ```text
//! not due ──► skip
//! < N+1 executions ──► skip (insufficient history)
//! no artifact ──► skip
//! otherwise:
//!   delta  = predictor(features of the last N+1 executions)
//!   target = last + delta - safety margin
//!   DROP INDEX IF EXISTS ...        (observed database)
//!   drop log + next_time_execution  (one metadata transaction)
//! ```
//!
//! Materialization at `target` is triggered externally through
//! [`LifecycleScheduler::materialize`].

pub mod features;
pub mod forecast;

pub use features::FeatureWindow;
pub use forecast::{
    ArtifactStore, DenseLayer, DenseNetwork, ForecastArtifact, ForecastError, Forecaster,
    StandardScaler, StoredArtifact,
};

use crate::advisor::{drop_statement, index_name};
use crate::config::SchedulerConfig;
use crate::error::{AdimError, AdimResult, Stage};
use crate::sources::SchemaExecutor;
use crate::store::{ForecastUpdate, MaintenanceLog, MetadataStore, TrackedQuery};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Derived index lifecycle state of a tracked query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Never forecast
    Idle,
    /// Forecast lies ahead and the indexes are not built
    ForecastPending,
    /// Most recent maintenance action built the indexes
    Materialized,
    /// Most recent maintenance action dropped the indexes
    Evicted,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::ForecastPending => "forecast-pending",
            LifecycleState::Materialized => "materialized",
            LifecycleState::Evicted => "evicted",
        }
    }

    /// Derive from the query row and its audit log (oldest first)
    pub fn derive(query: &TrackedQuery, logs: &[MaintenanceLog], now: DateTime<Utc>) -> Self {
        match logs.last() {
            Some(log) if log.index_created => LifecycleState::Materialized,
            _ if query.is_forecast_pending(now) => LifecycleState::ForecastPending,
            Some(_) => LifecycleState::Evicted,
            None if query.next_time_execution.is_some() => LifecycleState::ForecastPending,
            None => LifecycleState::Idle,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sweep left a query alone
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The current forecast has not been reached
    NotDue { next_time_execution: DateTime<Utc> },
    InsufficientHistory { available: usize, required: usize },
    NoForecastArtifact,
    Prediction(ForecastError),
    TimedOut,
    SchemaFailure { statement: String, message: String },
    Store(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotDue {
                next_time_execution,
            } => write!(f, "not due until {}", next_time_execution),
            SkipReason::InsufficientHistory {
                available,
                required,
            } => write!(f, "insufficient history ({} of {} executions)", available, required),
            SkipReason::NoForecastArtifact => write!(f, "no forecast artifact"),
            SkipReason::Prediction(e) => write!(f, "prediction failed: {}", e),
            SkipReason::TimedOut => write!(f, "timed out"),
            SkipReason::SchemaFailure { statement, message } => {
                write!(f, "{} failed: {}", statement, message)
            }
            SkipReason::Store(message) => write!(f, "store error: {}", message),
        }
    }
}

/// Result of evaluating one tracked query
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Updated(ForecastUpdate),
    Skipped {
        tracked_query_id: i64,
        reason: SkipReason,
    },
}

/// Summary of one sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub updates: Vec<ForecastUpdate>,
    pub skipped: Vec<(i64, SkipReason)>,
}

impl SweepReport {
    pub fn evaluated(&self) -> usize {
        self.updates.len() + self.skipped.len()
    }
}

pub struct LifecycleScheduler {
    store: Arc<dyn MetadataStore>,
    artifacts: Arc<dyn ArtifactStore>,
    executor: Arc<dyn SchemaExecutor>,
    config: SchedulerConfig,
}

impl LifecycleScheduler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        artifacts: Arc<dyn ArtifactStore>,
        executor: Arc<dyn SchemaExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            artifacts,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn safety_margin(&self) -> Duration {
        Duration::milliseconds((self.config.safety_margin_hours * 3_600_000.0).round() as i64)
    }

    /// Forecast updates of a sweep at the current time
    ///
    /// Zero updates is reported as [`AdimError::NoForecastsUpdated`].
    pub async fn run_lifecycle_sweep(&self) -> AdimResult<Vec<ForecastUpdate>> {
        let report = self.sweep_at(Utc::now()).await?;
        if report.updates.is_empty() {
            return Err(AdimError::NoForecastsUpdated);
        }
        Ok(report.updates)
    }

    /// Evaluate every auto-indexed query as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> AdimResult<SweepReport> {
        let sweep_id = Uuid::new_v4();

        let mut seen = HashSet::new();
        let queries: Vec<TrackedQuery> = self
            .store
            .auto_indexed_queries()?
            .into_iter()
            .filter(|q| seen.insert(q.id))
            .collect();

        tracing::info!(
            stage = %Stage::Scheduler,
            sweep_id = %sweep_id,
            queries = queries.len(),
            "Starting lifecycle sweep"
        );

        let timeout = std::time::Duration::from_secs(self.config.query_timeout_secs);
        let outcomes: Vec<SweepOutcome> = stream::iter(queries)
            .map(|query| async move {
                let id = query.id;
                match tokio::time::timeout(timeout, self.evaluate(query, now)).await {
                    Ok(outcome) => outcome,
                    Err(_) => SweepOutcome::Skipped {
                        tracked_query_id: id,
                        reason: SkipReason::TimedOut,
                    },
                }
            })
            .buffer_unordered(self.config.max_parallel_queries.max(1))
            .collect()
            .await;

        let mut report = SweepReport {
            sweep_id,
            updates: Vec::new(),
            skipped: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                SweepOutcome::Updated(update) => report.updates.push(update),
                SweepOutcome::Skipped {
                    tracked_query_id,
                    reason,
                } => {
                    match &reason {
                        SkipReason::TimedOut | SkipReason::SchemaFailure { .. } | SkipReason::Store(_) => {
                            tracing::warn!(
                                stage = %Stage::Scheduler,
                                sweep_id = %sweep_id,
                                tracked_query_id,
                                reason = %reason,
                                "Skipped tracked query"
                            )
                        }
                        _ => tracing::debug!(
                            stage = %Stage::Scheduler,
                            sweep_id = %sweep_id,
                            tracked_query_id,
                            reason = %reason,
                            "Skipped tracked query"
                        ),
                    }
                    report.skipped.push((tracked_query_id, reason));
                }
            }
        }

        report.updates.sort_by_key(|u| u.tracked_query_id);
        report.skipped.sort_by_key(|(id, _)| *id);

        tracing::info!(
            stage = %Stage::Scheduler,
            sweep_id = %sweep_id,
            updated = report.updates.len(),
            skipped = report.skipped.len(),
            "Lifecycle sweep finished"
        );
        Ok(report)
    }

    /// Forecast and evict one query
    pub async fn evaluate(&self, query: TrackedQuery, now: DateTime<Utc>) -> SweepOutcome {
        let id = query.id;
        match self.try_evaluate(&query, now).await {
            Ok(update) => SweepOutcome::Updated(update),
            Err(reason) => SweepOutcome::Skipped {
                tracked_query_id: id,
                reason,
            },
        }
    }

    async fn try_evaluate(
        &self,
        query: &TrackedQuery,
        now: DateTime<Utc>,
    ) -> Result<ForecastUpdate, SkipReason> {
        if let Some(next_time_execution) = query.next_time_execution.filter(|next| *next > now) {
            return Err(SkipReason::NotDue {
                next_time_execution,
            });
        }

        let required = self.config.window_size + 1;
        let recent = self
            .store
            .recent_occurrences(query.id, required)
            .map_err(|e| SkipReason::Store(e.to_string()))?;
        if recent.len() < required {
            return Err(SkipReason::InsufficientHistory {
                available: recent.len(),
                required,
            });
        }

        // executions after the previous forecast ran with the indexes in place
        let optimized: Vec<i64> = match query.next_time_execution {
            Some(previous) => recent
                .iter()
                .filter(|o| o.time_stamp > previous && !o.optimized)
                .map(|o| o.id)
                .collect(),
            None => Vec::new(),
        };

        let timestamps: Vec<DateTime<Utc>> = recent.iter().map(|o| o.time_stamp).collect();
        let window = FeatureWindow::from_timestamps(&timestamps, self.config.window_size).ok_or(
            SkipReason::InsufficientHistory {
                available: recent.len(),
                required,
            },
        )?;

        let artifact = self
            .artifacts
            .best_artifact(query.id)
            .await
            .map_err(|e| SkipReason::Store(e.to_string()))?
            .ok_or(SkipReason::NoForecastArtifact)?;

        let features = window.features.clone();
        let delta_secs = tokio::task::spawn_blocking(move || artifact.predict_delta(&features))
            .await
            .map_err(|e| SkipReason::Prediction(ForecastError::Model(e.to_string())))?
            .map_err(SkipReason::Prediction)?;

        let target = self
            .target_time(window.last, delta_secs)
            .ok_or(SkipReason::Prediction(ForecastError::OutOfRange(delta_secs)))?;

        for statement in &query.indexes {
            let Some(name) = index_name(statement) else {
                continue;
            };
            let drop = drop_statement(name);
            self.executor
                .execute(&drop)
                .await
                .map_err(|e| SkipReason::SchemaFailure {
                    statement: drop.clone(),
                    message: e.to_string(),
                })?;
        }

        self.store
            .record_forecast(query.id, now, target, &optimized)
            .map_err(|e| SkipReason::Store(e.to_string()))?;

        tracing::info!(
            stage = %Stage::Scheduler,
            tracked_query_id = query.id,
            delta_secs,
            next_time_execution = %target,
            "Forecast updated"
        );

        Ok(ForecastUpdate {
            tracked_query_id: query.id,
            next_execution_time: target,
        })
    }

    /// `last + delta - safety margin`, `None` when it leaves chrono's range
    fn target_time(&self, last: DateTime<Utc>, delta_secs: f64) -> Option<DateTime<Utc>> {
        let millis = (delta_secs * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        let delta = Duration::try_milliseconds(millis as i64)?;
        last.checked_add_signed(delta)?
            .checked_sub_signed(self.safety_margin())
    }

    fn indexed_query(&self, id: i64) -> AdimResult<TrackedQuery> {
        let query = self
            .store
            .tracked_query(id)?
            .ok_or(AdimError::TrackedQueryNotFound(id))?;
        if query.indexes.is_empty() {
            return Err(AdimError::NoIndexes(id));
        }
        Ok(query)
    }

    /// Build every stored index of a tracked query
    pub async fn materialize(&self, id: i64) -> AdimResult<MaintenanceLog> {
        let query = self.indexed_query(id)?;

        let started = Instant::now();
        for statement in &query.indexes {
            self.executor
                .execute(statement)
                .await
                .map_err(|e| AdimError::schema(Stage::Scheduler, Some(id), statement.as_str(), e))?;
        }
        let elapsed = started.elapsed().as_secs_f64();

        let log = self.store.record_materialization(id, Utc::now(), elapsed)?;
        tracing::info!(
            stage = %Stage::Scheduler,
            tracked_query_id = id,
            indexes = query.indexes.len(),
            elapsed_secs = elapsed,
            "Indexes materialized"
        );
        Ok(log)
    }

    /// Drop every stored index of a tracked query
    pub async fn evict(&self, id: i64) -> AdimResult<MaintenanceLog> {
        let query = self.indexed_query(id)?;

        for statement in &query.indexes {
            let Some(name) = index_name(statement) else {
                continue;
            };
            let drop = drop_statement(name);
            self.executor
                .execute(&drop)
                .await
                .map_err(|e| AdimError::schema(Stage::Scheduler, Some(id), drop.as_str(), e))?;
        }

        let log = self.store.append_maintenance_log(id, Utc::now(), false)?;
        tracing::info!(
            stage = %Stage::Scheduler,
            tracked_query_id = id,
            indexes = query.indexes.len(),
            "Indexes evicted"
        );
        Ok(log)
    }

    pub fn lifecycle_state(&self, id: i64, now: DateTime<Utc>) -> AdimResult<LifecycleState> {
        let query = self
            .store
            .tracked_query(id)?
            .ok_or(AdimError::TrackedQueryNotFound(id))?;
        let logs = self.store.maintenance_logs(id)?;
        Ok(LifecycleState::derive(&query, &logs, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::RecordingExecutor;
    use crate::store::{NewOccurrence, QueryMetrics, SqliteStore, StoreResult, TrackedQueryUpsert};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct FixedDelta(f64);

    impl Forecaster for FixedDelta {
        fn predict(&self, _features: &[f64]) -> Result<f64, ForecastError> {
            Ok(self.0)
        }
    }

    /// Returns a fixed-delta artifact for the listed queries
    #[derive(Default)]
    struct StubArtifacts {
        deltas: HashMap<i64, f64>,
        window_size: usize,
    }

    #[async_trait]
    impl ArtifactStore for StubArtifacts {
        async fn best_artifact(&self, id: i64) -> StoreResult<Option<ForecastArtifact>> {
            Ok(self.deltas.get(&id).map(|delta| ForecastArtifact {
                model: Arc::new(FixedDelta(*delta)),
                input_scaler: StandardScaler::identity(FeatureWindow::width(self.window_size)),
                output_scaler: StandardScaler::identity(1),
                score: 1.0,
            }))
        }
    }

    struct SlowArtifacts;

    #[async_trait]
    impl ArtifactStore for SlowArtifacts {
        async fn best_artifact(&self, _id: i64) -> StoreResult<Option<ForecastArtifact>> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            window_size: 3,
            ..Default::default()
        }
    }

    /// Tracked query with `executions` hourly occurrences starting at `base()`
    fn seed(store: &SqliteStore, text: &str, executions: i64, auto: bool) -> TrackedQuery {
        let query = store
            .upsert_tracked_queries(&[TrackedQueryUpsert {
                query: text.to_string(),
                metrics: QueryMetrics::default(),
                score: 0.5,
                indexes: Some(vec![format!(
                    "CREATE INDEX idx_{}_a_hash ON t USING hash (a);",
                    executions
                )]),
            }])
            .unwrap()
            .remove(0);
        store.set_auto_indexing(query.id, auto).unwrap();

        let occurrences: Vec<NewOccurrence> = (0..executions)
            .map(|i| NewOccurrence {
                tracked_query_id: query.id,
                time_stamp: base() + Duration::hours(i),
            })
            .collect();
        store.insert_occurrences(&occurrences).unwrap();
        store.tracked_query(query.id).unwrap().unwrap()
    }

    fn scheduler(
        store: &SqliteStore,
        artifacts: impl ArtifactStore + 'static,
        executor: Arc<RecordingExecutor>,
        config: SchedulerConfig,
    ) -> LifecycleScheduler {
        LifecycleScheduler::new(Arc::new(store.clone()), Arc::new(artifacts), executor, config)
    }

    #[tokio::test]
    async fn test_forecast_arithmetic_is_exact() {
        let store = SqliteStore::memory().unwrap();
        let query = seed(&store, "select a from t where a = 1", 4, true);
        let executor = Arc::new(RecordingExecutor::default());
        let artifacts = StubArtifacts {
            deltas: HashMap::from([(query.id, 86_400.0)]),
            window_size: 3,
        };
        let scheduler = scheduler(&store, artifacts, executor.clone(), config());

        let now = base() + Duration::hours(4);
        let report = scheduler.sweep_at(now).await.unwrap();

        let last = base() + Duration::hours(3);
        let expected = last + Duration::seconds(86_400) - Duration::hours(6);
        assert_eq!(
            report.updates,
            vec![ForecastUpdate {
                tracked_query_id: query.id,
                next_execution_time: expected,
            }]
        );

        let stored = store.tracked_query(query.id).unwrap().unwrap();
        assert_eq!(stored.next_time_execution, Some(expected));
        assert_eq!(
            executor.statements(),
            vec!["DROP INDEX IF EXISTS idx_4_a_hash".to_string()]
        );
    }

    #[tokio::test]
    async fn test_one_maintenance_log_per_sweep() {
        let store = SqliteStore::memory().unwrap();
        let query = seed(&store, "select a from t where a = 1", 5, true);
        let artifacts = StubArtifacts {
            deltas: HashMap::from([(query.id, 86_400.0)]),
            window_size: 3,
        };
        let scheduler = scheduler(&store, artifacts, Arc::default(), config());

        let now = base() + Duration::hours(5);
        scheduler.sweep_at(now).await.unwrap();
        let second = scheduler.sweep_at(now).await.unwrap();

        assert!(second.updates.is_empty());
        assert!(matches!(second.skipped[0].1, SkipReason::NotDue { .. }));

        let logs = store.maintenance_logs(query.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].index_created);
        assert_eq!(
            scheduler.lifecycle_state(query.id, now).unwrap(),
            LifecycleState::ForecastPending
        );
    }

    #[tokio::test]
    async fn test_manual_queries_are_untouched() {
        let store = SqliteStore::memory().unwrap();
        let manual = seed(&store, "select a from t where a = 1", 10, false);
        let artifacts = StubArtifacts {
            deltas: HashMap::from([(manual.id, 60.0)]),
            window_size: 3,
        };
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(&store, artifacts, executor.clone(), config());

        let report = scheduler.sweep_at(base() + Duration::days(1)).await.unwrap();
        assert_eq!(report.evaluated(), 0);
        assert!(executor.statements().is_empty());
        assert!(store.maintenance_logs(manual.id).unwrap().is_empty());
        assert_eq!(
            store.tracked_query(manual.id).unwrap().unwrap().next_time_execution,
            None
        );

        assert!(matches!(
            scheduler.run_lifecycle_sweep().await,
            Err(AdimError::NoForecastsUpdated)
        ));
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let store = SqliteStore::memory().unwrap();
        let short = seed(&store, "select short", 3, true);
        let orphan = seed(&store, "select orphan", 4, true);
        let scheduler = scheduler(&store, StubArtifacts::default(), Arc::default(), config());

        let report = scheduler.sweep_at(base() + Duration::days(1)).await.unwrap();
        assert!(report.updates.is_empty());
        assert_eq!(
            report.skipped,
            vec![
                (
                    short.id,
                    SkipReason::InsufficientHistory {
                        available: 3,
                        required: 4
                    }
                ),
                (orphan.id, SkipReason::NoForecastArtifact),
            ]
        );
    }

    #[tokio::test]
    async fn test_schema_failure_skips_without_bookkeeping() {
        let store = SqliteStore::memory().unwrap();
        let query = seed(&store, "select a from t where a = 1", 4, true);
        let artifacts = StubArtifacts {
            deltas: HashMap::from([(query.id, 3600.0)]),
            window_size: 3,
        };
        let executor = Arc::new(RecordingExecutor::failing_on("DROP"));
        let scheduler = scheduler(&store, artifacts, executor, config());

        let report = scheduler.sweep_at(base() + Duration::hours(4)).await.unwrap();
        assert!(matches!(
            report.skipped[0].1,
            SkipReason::SchemaFailure { .. }
        ));
        assert!(store.maintenance_logs(query.id).unwrap().is_empty());
        assert_eq!(
            store.tracked_query(query.id).unwrap().unwrap().next_time_execution,
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skips_query() {
        let store = SqliteStore::memory().unwrap();
        seed(&store, "select a from t where a = 1", 4, true);
        let scheduler = scheduler(
            &store,
            SlowArtifacts,
            Arc::default(),
            SchedulerConfig {
                query_timeout_secs: 1,
                ..config()
            },
        );

        let report = scheduler.sweep_at(base() + Duration::hours(4)).await.unwrap();
        assert_eq!(report.skipped[0].1, SkipReason::TimedOut);
    }

    #[tokio::test]
    async fn test_executions_after_forecast_flagged_optimized() {
        let store = SqliteStore::memory().unwrap();
        let query = seed(&store, "select a from t where a = 1", 4, true);
        // previous forecast between the 2nd and 3rd execution
        store
            .record_forecast(query.id, base(), base() + Duration::minutes(90), &[])
            .unwrap();

        let artifacts = StubArtifacts {
            deltas: HashMap::from([(query.id, 3600.0)]),
            window_size: 3,
        };
        let scheduler = scheduler(&store, artifacts, Arc::default(), config());
        scheduler.sweep_at(base() + Duration::hours(4)).await.unwrap();

        let optimized = store
            .occurrences_since(query.id, base(), Some(true))
            .unwrap();
        assert_eq!(optimized.len(), 2);
        assert_eq!(optimized[0].time_stamp, base() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_skipped_query_keeps_occurrences_unflagged() {
        let store = SqliteStore::memory().unwrap();
        let orphan = seed(&store, "select orphan", 4, true);
        let failing = seed(&store, "select failing", 4, true);
        for id in [orphan.id, failing.id] {
            store
                .record_forecast(id, base(), base() + Duration::minutes(90), &[])
                .unwrap();
        }

        let artifacts = StubArtifacts {
            deltas: HashMap::from([(failing.id, 3600.0)]),
            window_size: 3,
        };
        let executor = Arc::new(RecordingExecutor::failing_on("DROP"));
        let scheduler = scheduler(&store, artifacts, executor, config());

        let report = scheduler.sweep_at(base() + Duration::hours(4)).await.unwrap();
        assert_eq!(report.skipped[0], (orphan.id, SkipReason::NoForecastArtifact));
        assert!(matches!(report.skipped[1].1, SkipReason::SchemaFailure { .. }));

        for id in [orphan.id, failing.id] {
            assert!(store
                .occurrences_since(id, base(), Some(true))
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_out_of_range_prediction_skips_query() {
        let store = SqliteStore::memory().unwrap();
        let absurd = seed(&store, "select absurd", 4, true);
        let sane = seed(&store, "select sane", 4, true);
        let artifacts = StubArtifacts {
            deltas: HashMap::from([(absurd.id, 1e15), (sane.id, 3600.0)]),
            window_size: 3,
        };
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(&store, artifacts, executor, config());

        let report = scheduler.sweep_at(base() + Duration::hours(4)).await.unwrap();
        assert_eq!(
            report.skipped,
            vec![(
                absurd.id,
                SkipReason::Prediction(ForecastError::OutOfRange(1e15))
            )]
        );
        assert_eq!(report.updates.len(), 1);
        assert_eq!(report.updates[0].tracked_query_id, sane.id);
        assert!(store.maintenance_logs(absurd.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_materialize_and_evict() {
        let store = SqliteStore::memory().unwrap();
        let query = seed(&store, "select a from t where a = 1", 0, false);
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(&store, StubArtifacts::default(), executor.clone(), config());

        let now = Utc::now();
        assert_eq!(scheduler.lifecycle_state(query.id, now).unwrap(), LifecycleState::Idle);

        let log = scheduler.materialize(query.id).await.unwrap();
        assert!(log.index_created);
        assert_eq!(
            scheduler.lifecycle_state(query.id, now).unwrap(),
            LifecycleState::Materialized
        );

        scheduler.evict(query.id).await.unwrap();
        assert_eq!(
            scheduler.lifecycle_state(query.id, now).unwrap(),
            LifecycleState::Evicted
        );
        assert_eq!(
            executor.statements(),
            vec![
                "CREATE INDEX idx_0_a_hash ON t USING hash (a);".to_string(),
                "DROP INDEX IF EXISTS idx_0_a_hash".to_string(),
            ]
        );

        assert!(matches!(
            scheduler.materialize(9999).await,
            Err(AdimError::TrackedQueryNotFound(9999))
        ));
    }
}
