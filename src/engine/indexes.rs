//! Index advice, manual index edits and lifecycle operations

use super::AdimEngine;
use crate::advisor::{index_name, CreateIndexStatement};
use crate::error::{AdimError, AdimResult, Stage};
use crate::scheduler::LifecycleState;
use crate::store::{ForecastUpdate, MaintenanceLog, MetadataStore, TrackedQuery};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

/// Whether a stored index currently exists in the observed database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub name: String,
    pub statement: String,
    pub materialized: bool,
}

impl IndexStatus {
    pub fn label(&self) -> &'static str {
        if self.materialized {
            "materialized"
        } else {
            "not materialized"
        }
    }
}

impl AdimEngine {
    /// Candidates for `sql` given the live indexes of every table it uses
    pub async fn find_best_indexes(&self, sql: &str) -> AdimResult<Vec<CreateIndexStatement>> {
        let shape = self.advisor.analyze(sql)?;

        let mut existing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for table in shape.tables.keys() {
            let definitions = self
                .statistics
                .index_definitions(table)
                .await
                .map_err(|e| AdimError::external(Stage::Advisor, self.statistics.name(), e))?;
            existing.insert(
                table.clone(),
                definitions.into_iter().map(|d| d.definition).collect(),
            );
        }

        Ok(self.advisor.candidates(&shape, &existing))
    }

    /// Re-run the advisor for one tracked query
    ///
    /// Stored statements whose index is live stay in the list so the
    /// scheduler can still evict them; the rest are replaced by fresh advice.
    pub async fn refresh_indexes(&self, id: i64) -> AdimResult<TrackedQuery> {
        let query = self.require(id)?;
        let statements = self.find_best_indexes(&query.query).await.map_err(|e| match e {
            AdimError::Parse { stage, message, .. } => AdimError::parse(stage, Some(id), message),
            other => other,
        })?;

        let mut indexes = Vec::new();
        for statement in query.indexes {
            let Some(name) = index_name(&statement) else {
                continue;
            };
            let live = self
                .statistics
                .index_exists(name)
                .await
                .map_err(|e| AdimError::external(Stage::Advisor, self.statistics.name(), e))?;
            if live {
                indexes.push(statement);
            }
        }
        let kept = indexes.len();

        for statement in statements {
            let present = indexes
                .iter()
                .any(|existing| index_name(existing) == Some(statement.name()));
            if !present {
                indexes.push(statement.into_string());
            }
        }

        self.store.update_indexes(id, &indexes)?;
        tracing::info!(
            stage = %Stage::Advisor,
            tracked_query_id = id,
            kept_live = kept,
            indexes = indexes.len(),
            "Index candidates refreshed"
        );
        self.require(id)
    }

    /// Validate and append a manually written index statement
    pub async fn add_index(&self, id: i64, statement: &str) -> AdimResult<TrackedQuery> {
        let query = self.require(id)?;

        let parsed = CreateIndexStatement::parse(statement)?;
        let duplicate = query.indexes.iter().any(|existing| {
            existing.trim() == parsed.as_str() || index_name(existing) == Some(parsed.name())
        });
        if duplicate {
            return Err(AdimError::DuplicateIndex {
                tracked_query_id: id,
                name: parsed.name().to_string(),
            });
        }

        let validated = self
            .advisor
            .validate_index_statement(self.executor.as_ref(), statement, id)
            .await?;

        let mut indexes = query.indexes;
        indexes.push(validated.into_string());
        self.store.update_indexes(id, &indexes)?;
        self.require(id)
    }

    /// Remove one stored statement by its exact text
    pub fn remove_index(&self, id: i64, statement: &str) -> AdimResult<TrackedQuery> {
        let query = self.require(id)?;
        let statement = statement.trim();

        let mut indexes = query.indexes;
        let Some(position) = indexes.iter().position(|s| s.trim() == statement) else {
            return Err(AdimError::IndexNotFound {
                tracked_query_id: id,
                name: index_name(statement).unwrap_or(statement).to_string(),
            });
        };
        indexes.remove(position);

        self.store.update_indexes(id, &indexes)?;
        self.require(id)
    }

    /// Materialization state of every stored index
    pub async fn index_status(&self, id: i64) -> AdimResult<Vec<IndexStatus>> {
        let query = self.require(id)?;

        let mut status = Vec::with_capacity(query.indexes.len());
        for statement in query.indexes {
            let Some(name) = index_name(&statement).map(str::to_string) else {
                continue;
            };
            let materialized = self
                .statistics
                .index_exists(&name)
                .await
                .map_err(|e| AdimError::external(Stage::Scheduler, self.statistics.name(), e))?;
            status.push(IndexStatus {
                name,
                statement,
                materialized,
            });
        }
        Ok(status)
    }

    pub async fn materialize_indexes(&self, id: i64) -> AdimResult<MaintenanceLog> {
        self.scheduler.materialize(id).await
    }

    pub async fn evict_indexes(&self, id: i64) -> AdimResult<MaintenanceLog> {
        self.scheduler.evict(id).await
    }

    pub fn lifecycle_state(&self, id: i64) -> AdimResult<LifecycleState> {
        self.scheduler.lifecycle_state(id, Utc::now())
    }

    pub async fn run_lifecycle_sweep(&self) -> AdimResult<Vec<ForecastUpdate>> {
        self.scheduler.run_lifecycle_sweep().await
    }
}
