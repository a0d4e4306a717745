//! Admission, scoring and tracked-query administration

use super::AdimEngine;
use crate::error::{AdimError, AdimResult, Stage};
use crate::scheduler::StoredArtifact;
use crate::scorer::{Admission, PlannedEntry};
use crate::sources::StatRow;
use crate::store::{
    ForecastUpdate, MaintenanceLog, MetadataStore, Occurrence, TrackedQuery, TrackedQueryUpsert,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WHERE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("where pattern is valid"));

const INTERNAL_MARKERS: [&str; 3] = ["pg_", "information_schema", "pg_toast"];

/// Statement touches catalog or toast relations
fn is_internal(query: &str) -> bool {
    let lowered = query.to_lowercase();
    INTERNAL_MARKERS.iter().any(|m| lowered.contains(m))
}

impl AdimEngine {
    /// Score `rows` together with every tracked query and persist the result
    ///
    /// New statements above the threshold are admitted with their initial
    /// index candidates; tracked queries above it get fresh metrics and
    /// scores. Returns the rows the pass stored.
    pub async fn admit_or_refresh_tracked_queries(
        &self,
        rows: &[StatRow],
    ) -> AdimResult<Vec<TrackedQuery>> {
        let tracked = self.store.tracked_queries()?;
        if rows.is_empty() && tracked.is_empty() {
            return Err(AdimError::NothingToScore);
        }

        let plan = self.scorer.plan(rows, &tracked);
        self.apply_plan(plan, None).await
    }

    /// Re-score the tracked queries among themselves
    pub async fn rescore_tracked_queries(&self) -> AdimResult<Vec<TrackedQuery>> {
        let tracked = self.store.tracked_queries()?;
        if tracked.is_empty() {
            return Ok(Vec::new());
        }

        let plan = self.scorer.plan(&[], &tracked);
        self.apply_plan(plan, None).await
    }

    /// Pull statistics from the observed database and admit/refresh
    pub async fn run_diagnostics(&self) -> AdimResult<Vec<TrackedQuery>> {
        let rows = self.statement_stats(Stage::Scorer).await?;
        tracing::info!(stage = %Stage::Scorer, rows = rows.len(), "Fetched statement statistics");
        self.admit_or_refresh_tracked_queries(&rows).await
    }

    async fn statement_stats(&self, stage: Stage) -> AdimResult<Vec<StatRow>> {
        self.statistics
            .statement_stats()
            .await
            .map_err(|e| AdimError::external(stage, self.statistics.name(), e))
    }

    /// Persist a scoring plan in one transaction
    ///
    /// `force` admits that statement even when it scores below the
    /// threshold.
    async fn apply_plan(
        &self,
        plan: Vec<PlannedEntry>,
        force: Option<&str>,
    ) -> AdimResult<Vec<TrackedQuery>> {
        let mut upserts = Vec::with_capacity(plan.len());

        for entry in plan {
            let forced = force.map(|q| q.trim() == entry.query).unwrap_or(false);
            let indexes = match entry.admission {
                Admission::Refresh => None,
                Admission::Unchanged if forced => None,
                Admission::Unchanged => continue,
                Admission::Admit => Some(self.initial_indexes(&entry.query).await?),
                Admission::BelowThreshold if forced => {
                    Some(self.initial_indexes(&entry.query).await?)
                }
                Admission::BelowThreshold => continue,
            };

            upserts.push(TrackedQueryUpsert {
                query: entry.query,
                metrics: entry.metrics,
                score: entry.score,
                indexes,
            });
        }

        let saved = self.store.upsert_tracked_queries(&upserts)?;
        tracing::info!(
            stage = %Stage::Scorer,
            tracked = saved.len(),
            admitted = upserts.iter().filter(|u| u.indexes.is_some()).count(),
            "Scoring pass stored"
        );
        Ok(saved)
    }

    /// Candidates for a newly admitted statement; unparseable SQL yields none
    async fn initial_indexes(&self, query: &str) -> AdimResult<Vec<String>> {
        match self.find_best_indexes(query).await {
            Ok(statements) => Ok(statements.into_iter().map(|s| s.into_string()).collect()),
            Err(AdimError::Parse { message, .. }) => {
                tracing::warn!(
                    stage = %Stage::Advisor,
                    error = %message,
                    "Admitting statement without index candidates"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// All tracked queries, ordered by id
    pub fn list_tracked_queries(&self) -> AdimResult<Vec<TrackedQuery>> {
        Ok(self.store.tracked_queries()?)
    }

    pub fn tracked_query(&self, id: i64) -> AdimResult<TrackedQuery> {
        self.require(id)
    }

    /// Filtering statements from the statistics source that are not tracked
    pub async fn untracked_candidates(&self) -> AdimResult<Vec<StatRow>> {
        let rows = self.statement_stats(Stage::Scorer).await?;
        let tracked = self.store.tracked_queries()?;
        let known: HashSet<&str> = tracked.iter().map(|q| q.query.trim()).collect();

        Ok(rows
            .into_iter()
            .filter(|row| WHERE_CLAUSE.is_match(&row.query))
            .filter(|row| !is_internal(&row.query))
            .filter(|row| !known.contains(row.query.trim()))
            .collect())
    }

    /// Track one statement of the statistics source by its identifier
    pub async fn add_tracked_query(&self, stat_query_id: &str) -> AdimResult<TrackedQuery> {
        let row = self
            .statistics
            .statement_stats_by_id(stat_query_id)
            .await
            .map_err(|e| AdimError::external(Stage::Scorer, self.statistics.name(), e))?
            .ok_or_else(|| AdimError::StatementNotFound(stat_query_id.to_string()))?;

        let tracked = self.store.tracked_queries()?;
        let plan = self.scorer.plan(std::slice::from_ref(&row), &tracked);
        let saved = self.apply_plan(plan, Some(&row.query)).await?;

        let text = row.query.trim();
        saved
            .into_iter()
            .find(|q| q.query == text)
            .ok_or_else(|| AdimError::StatementNotFound(stat_query_id.to_string()))
    }

    /// Delete a tracked query and re-score the survivors
    pub async fn delete_tracked_query(&self, id: i64) -> AdimResult<Vec<TrackedQuery>> {
        if !self.store.delete_tracked_query(id)? {
            return Err(AdimError::TrackedQueryNotFound(id));
        }
        tracing::info!(tracked_query_id = id, "Tracked query deleted");
        self.rescore_tracked_queries().await
    }

    pub fn set_auto_indexing(&self, id: i64, enabled: bool) -> AdimResult<TrackedQuery> {
        if !self.store.set_auto_indexing(id, enabled)? {
            return Err(AdimError::TrackedQueryNotFound(id));
        }
        tracing::info!(tracked_query_id = id, enabled, "Auto indexing updated");
        self.require(id)
    }

    /// Executions of a tracked query since `since`, oldest first
    pub fn hits(
        &self,
        id: i64,
        since: DateTime<Utc>,
        optimized: Option<bool>,
    ) -> AdimResult<Vec<Occurrence>> {
        self.require(id)?;
        Ok(self.store.occurrences_since(id, since, optimized)?)
    }

    pub fn maintenance_history(&self, id: i64) -> AdimResult<Vec<MaintenanceLog>> {
        self.require(id)?;
        Ok(self.store.maintenance_logs(id)?)
    }

    /// Forecasts that have not been reached yet
    pub fn schedules(&self) -> AdimResult<Vec<ForecastUpdate>> {
        Ok(self.store.scheduled_forecasts(Utc::now())?)
    }

    /// Deposit a trained predictor for a tracked query
    pub fn store_artifact(&self, id: i64, artifact: &StoredArtifact) -> AdimResult<i64> {
        self.require(id)?;
        Ok(self.store.store_artifact(id, artifact)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::test_support::engine;
    use crate::error::AdimError;
    use crate::sources::testing::{stat_row, FakeStatistics};
    use crate::sources::StatRow;
    use chrono::Utc;

    fn with_id(mut row: StatRow, id: &str) -> StatRow {
        row.query_id = Some(id.to_string());
        row
    }

    #[tokio::test]
    async fn test_admission_generates_candidates() {
        let engine = engine(FakeStatistics::default());
        let rows = vec![
            stat_row("SELECT * FROM orders WHERE customer_id = 7", 900.0, 9.0, 100),
            stat_row("SELECT 1", 1.0, 0.1, 1),
        ];

        let saved = engine.admit_or_refresh_tracked_queries(&rows).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(
            saved[0].indexes,
            vec!["CREATE INDEX idx_orders_customer_id_hash ON orders USING hash (customer_id);"]
        );
        assert!(!saved[0].auto_indexing);
    }

    #[tokio::test]
    async fn test_unparseable_statement_admitted_without_indexes() {
        let engine = engine(FakeStatistics::default());
        let rows = vec![
            stat_row("SELECT * FROM orders WHERE id = 1", 1.0, 1.0, 1),
            stat_row("SELEKT broken WHERE", 500.0, 50.0, 50),
        ];

        let saved = engine.admit_or_refresh_tracked_queries(&rows).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].query, "SELEKT broken WHERE");
        assert!(saved[0].indexes.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_indexes_and_updates_metrics() {
        let engine = engine(FakeStatistics::default());
        let heavy = "SELECT * FROM orders WHERE customer_id = 7";
        engine
            .admit_or_refresh_tracked_queries(&[
                stat_row(heavy, 900.0, 9.0, 100),
                stat_row("SELECT * FROM t WHERE a = 1", 1.0, 0.1, 1),
            ])
            .await
            .unwrap();

        let saved = engine
            .admit_or_refresh_tracked_queries(&[
                stat_row(heavy, 1000.0, 10.0, 120),
                stat_row("SELECT * FROM t WHERE a = 1", 1.0, 0.1, 1),
            ])
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].metrics.calls, 120);
        assert_eq!(saved[0].indexes.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_score() {
        let engine = engine(FakeStatistics::default());
        assert!(matches!(
            engine.admit_or_refresh_tracked_queries(&[]).await,
            Err(AdimError::NothingToScore)
        ));
        assert!(engine.rescore_tracked_queries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_source_failure() {
        let engine = engine(FakeStatistics {
            unavailable: true,
            ..Default::default()
        });
        assert!(matches!(
            engine.run_diagnostics().await,
            Err(AdimError::ExternalSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_untracked_candidates_and_forced_add() {
        let rows = vec![
            with_id(stat_row("SELECT * FROM big WHERE x = 1", 900.0, 9.0, 90), "q1"),
            with_id(stat_row("SELECT * FROM small WHERE y = 2", 1.0, 0.1, 1), "q2"),
            with_id(stat_row("SELECT * FROM pg_stat_activity WHERE pid = 1", 5.0, 1.0, 1), "q3"),
            with_id(stat_row("SELECT now()", 5.0, 1.0, 1), "q4"),
        ];
        let engine = engine(FakeStatistics::with_rows(rows));

        let candidates = engine.untracked_candidates().await.unwrap();
        let ids: Vec<_> = candidates.iter().filter_map(|r| r.query_id.as_deref()).collect();
        assert_eq!(ids, vec!["q1", "q2"]);

        // lowest scoring statement is still admitted when asked for explicitly
        let added = engine.add_tracked_query("q2").await.unwrap();
        assert_eq!(added.query, "SELECT * FROM small WHERE y = 2");
        assert_eq!(added.indexes.len(), 1);

        let candidates = engine.untracked_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);

        assert!(matches!(
            engine.add_tracked_query("missing").await,
            Err(AdimError::StatementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_rescores_survivors() {
        let engine = engine(FakeStatistics::default());
        let saved = engine
            .admit_or_refresh_tracked_queries(&[
                stat_row("SELECT * FROM a WHERE x = 1", 900.0, 9.0, 90),
                stat_row("SELECT * FROM b WHERE x = 1", 500.0, 5.0, 50),
                stat_row("SELECT * FROM c WHERE x = 1", 100.0, 1.0, 10),
                stat_row("SELECT * FROM d WHERE x = 1", 1.0, 0.1, 1),
            ])
            .await
            .unwrap();
        assert_eq!(saved.len(), 3);

        let first = saved.iter().find(|q| q.query.contains("FROM a")).unwrap().id;
        let lowest = saved.iter().find(|q| q.query.contains("FROM c")).unwrap().clone();
        let survivors = engine.delete_tracked_query(first).await.unwrap();

        // b now tops the batch; c drops to zero and keeps its stored row
        assert_eq!(survivors.len(), 1);
        assert!(survivors[0].query.contains("FROM b"));
        assert!((survivors[0].score - 0.70).abs() < 1e-9);
        assert_eq!(engine.list_tracked_queries().unwrap().len(), 2);
        assert_eq!(engine.tracked_query(lowest.id).unwrap().score, lowest.score);

        assert!(matches!(
            engine.delete_tracked_query(first).await,
            Err(AdimError::TrackedQueryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_indexing_and_lookups() {
        let engine = engine(FakeStatistics::default());
        let saved = engine
            .admit_or_refresh_tracked_queries(&[
                stat_row("SELECT * FROM a WHERE x = 1", 900.0, 9.0, 90),
                stat_row("SELECT * FROM b WHERE x = 1", 1.0, 0.1, 1),
            ])
            .await
            .unwrap();
        let id = saved[0].id;

        assert!(engine.set_auto_indexing(id, true).unwrap().auto_indexing);
        assert!(engine.hits(id, Utc::now(), None).unwrap().is_empty());
        assert!(engine.maintenance_history(id).unwrap().is_empty());
        assert!(engine.schedules().unwrap().is_empty());
        assert!(matches!(
            engine.set_auto_indexing(4242, true),
            Err(AdimError::TrackedQueryNotFound(4242))
        ));
    }
}
