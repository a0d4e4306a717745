//! ADIM Engine
//!
//! Wires the four components to the metadata store and the collaborators:
//!
//! ```text
//! LogSource ──► Log Matcher ──► occurrences ─────────────┐
//! StatisticsSource ──► Workload Scorer ──► tracked queries ├──► Lifecycle Scheduler ──► SchemaExecutor
//!                      Index Advisor ──► index lists ─────┘
//! ```
//!
//! Operations are grouped by concern:
//! - `workload`: admission, scoring and tracked-query administration
//! - `indexes`: advice, manual index edits, materialization, sweeps
//! - `logs`: occurrence matching

mod indexes;
mod logs;
mod workload;

pub use indexes::IndexStatus;

use crate::advisor::IndexAdvisor;
use crate::config::AdimConfig;
use crate::error::{AdimError, AdimResult};
use crate::matcher::LogMatcher;
use crate::scheduler::LifecycleScheduler;
use crate::scorer::WorkloadScorer;
use crate::sources::{SchemaExecutor, StatisticsSource};
use crate::store::{MetadataStore, SqliteStore, TrackedQuery};
use std::path::Path;
use std::sync::Arc;

pub struct AdimEngine {
    config: AdimConfig,
    store: SqliteStore,
    statistics: Arc<dyn StatisticsSource>,
    executor: Arc<dyn SchemaExecutor>,
    matcher: LogMatcher,
    scorer: WorkloadScorer,
    advisor: IndexAdvisor,
    scheduler: LifecycleScheduler,
}

impl AdimEngine {
    /// Open the metadata store named by the config and build the engine
    pub fn open(
        config: AdimConfig,
        statistics: Arc<dyn StatisticsSource>,
        executor: Arc<dyn SchemaExecutor>,
    ) -> AdimResult<Self> {
        let store = SqliteStore::open(Path::new(&config.store.path))?;
        Self::new(config, store, statistics, executor)
    }

    pub fn new(
        config: AdimConfig,
        store: SqliteStore,
        statistics: Arc<dyn StatisticsSource>,
        executor: Arc<dyn SchemaExecutor>,
    ) -> AdimResult<Self> {
        config.validate()?;

        let matcher = LogMatcher::new(&config.matcher)?;
        let scorer = WorkloadScorer::new(&config.scorer);
        let advisor = IndexAdvisor::new(&config.advisor);
        let scheduler = LifecycleScheduler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            executor.clone(),
            config.scheduler.clone(),
        );

        tracing::info!(
            store = ?store.path(),
            statistics = statistics.name(),
            executor = executor.name(),
            "ADIM engine ready"
        );

        Ok(Self {
            config,
            store,
            statistics,
            executor,
            matcher,
            scorer,
            advisor,
            scheduler,
        })
    }

    pub fn config(&self) -> &AdimConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn matcher(&self) -> &LogMatcher {
        &self.matcher
    }

    pub fn advisor(&self) -> &IndexAdvisor {
        &self.advisor
    }

    pub fn scheduler(&self) -> &LifecycleScheduler {
        &self.scheduler
    }

    fn require(&self, id: i64) -> AdimResult<TrackedQuery> {
        self.store
            .tracked_query(id)?
            .ok_or(AdimError::TrackedQueryNotFound(id))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sources::testing::{FakeStatistics, RecordingExecutor};

    pub(crate) fn engine_with(
        statistics: FakeStatistics,
        executor: Arc<RecordingExecutor>,
    ) -> AdimEngine {
        AdimEngine::new(
            AdimConfig::default(),
            SqliteStore::memory().unwrap(),
            Arc::new(statistics),
            executor,
        )
        .unwrap()
    }

    pub(crate) fn engine(statistics: FakeStatistics) -> AdimEngine {
        engine_with(statistics, Arc::default())
    }
}
