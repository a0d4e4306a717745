//! Index Advisor
//!
//! Proposes `CREATE INDEX` statements for one SQL statement:
//!
//! 1. `shape` parses the statement and accumulates per-table column usage
//! 2. `candidates` applies the four generation rules and the dedup guard
//! 3. `statement` validates operator-supplied index statements
//!
//! Generated names are deterministic, so running the advisor again against
//! an unchanged schema yields nothing new.

pub mod candidates;
pub mod shape;
pub mod statement;

pub use candidates::{definition_table, Candidate, CandidateKind};
pub use shape::{analyze, GapReason, QueryShape, ResolutionGap, TableUsage};
pub use statement::{drop_statement, index_name, CreateIndexStatement, IndexMethod};

use crate::config::AdvisorConfig;
use crate::error::{AdimError, AdimResult, Stage};
use crate::sources::SchemaExecutor;
use std::collections::BTreeMap;

/// Group flat index definitions by the table they are on
pub fn definitions_by_table(definitions: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for definition in definitions {
        if let Some(table) = definition_table(definition) {
            grouped.entry(table).or_default().push(definition.clone());
        }
    }
    grouped
}

#[derive(Debug, Clone, Default)]
pub struct IndexAdvisor {
    config: AdvisorConfig,
}

impl IndexAdvisor {
    pub fn new(config: &AdvisorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn analyze(&self, sql: &str) -> AdimResult<QueryShape> {
        analyze(sql)
    }

    /// Candidates for an analyzed shape, `existing` keyed by table
    pub fn candidates(
        &self,
        shape: &QueryShape,
        existing: &BTreeMap<String, Vec<String>>,
    ) -> Vec<CreateIndexStatement> {
        candidates::generate(shape, existing)
    }

    /// Parse `sql` and propose indexes not covered by `existing`
    pub fn generate_candidates(
        &self,
        sql: &str,
        existing: &[String],
    ) -> AdimResult<Vec<CreateIndexStatement>> {
        let shape = self.analyze(sql)?;
        let statements = self.candidates(&shape, &definitions_by_table(existing));

        tracing::debug!(
            stage = %Stage::Advisor,
            tables = shape.tables.len(),
            gaps = shape.gaps.len(),
            candidates = statements.len(),
            "Generated index candidates"
        );
        Ok(statements)
    }

    /// Check a manually submitted statement against the live schema
    ///
    /// The index is created and dropped again right away; only the text is
    /// kept.
    pub async fn validate_index_statement(
        &self,
        executor: &dyn SchemaExecutor,
        text: &str,
        tracked_query_id: i64,
    ) -> AdimResult<CreateIndexStatement> {
        let statement = CreateIndexStatement::parse(text)?;
        if self.config.skip_validation {
            return Ok(statement);
        }

        executor.execute(statement.as_str()).await.map_err(|e| {
            AdimError::schema(
                Stage::Advisor,
                Some(tracked_query_id),
                statement.as_str(),
                e,
            )
        })?;

        let drop = statement.drop_statement();
        executor
            .execute(&drop)
            .await
            .map_err(|e| AdimError::schema(Stage::Advisor, Some(tracked_query_id), &drop, e))?;

        tracing::info!(
            stage = %Stage::Advisor,
            tracked_query_id,
            index = %statement.name(),
            "Validated index statement"
        );
        Ok(statement)
    }
}
