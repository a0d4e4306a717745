//! Workload Scorer
//!
//! Ranks statements by a weighted sum of min-max normalized execution
//! metrics:
//!
//! ```text
//! score = 0.30·total_exec_time + 0.25·mean_exec_time + 0.15·calls
//!       + 0.15·shared_blks_read + 0.15·temp_blks_written
//! ```
//!
//! Scores are relative to the batch being scored, so re-scoring always runs
//! over new statistics together with every tracked query.

use crate::config::ScorerConfig;
use crate::sources::StatRow;
use crate::store::{QueryMetrics, TrackedQuery};
use std::collections::HashSet;

pub use crate::config::ScoreWeights;

impl From<&StatRow> for QueryMetrics {
    fn from(row: &StatRow) -> Self {
        QueryMetrics {
            total_exec_time: row.total_exec_time,
            mean_exec_time: row.mean_exec_time,
            calls: row.calls,
            shared_blks_read: row.shared_blks_read,
            temp_blks_written: row.temp_blks_written,
        }
    }
}

impl From<&TrackedQuery> for StatRow {
    fn from(query: &TrackedQuery) -> Self {
        StatRow {
            query_id: None,
            query: query.query.clone(),
            total_exec_time: query.metrics.total_exec_time,
            mean_exec_time: query.metrics.mean_exec_time,
            calls: query.metrics.calls,
            shared_blks_read: query.metrics.shared_blks_read,
            temp_blks_written: query.metrics.temp_blks_written,
        }
    }
}

/// A statement with its computed score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub row: StatRow,
    pub score: f64,
}

/// What a scoring pass does with one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already tracked and above the threshold; metrics and score are refreshed
    Refresh,
    /// Already tracked but not above the threshold; the stored row stays as is
    Unchanged,
    /// New and above the threshold; becomes a tracked query
    Admit,
    /// New but not above the threshold
    BelowThreshold,
}

/// One line of an admission plan, in ranking order
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub query: String,
    pub metrics: QueryMetrics,
    pub score: f64,
    pub admission: Admission,
}

/// Min-max normalization; all zeros when the values are constant
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max <= min {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Union of fresh statistics and tracked queries, keyed by trimmed text
///
/// Fresh rows win on identical text. Order: fresh rows first, then tracked
/// queries not present in the fresh rows.
pub fn merge_rows(rows: &[StatRow], tracked: &[TrackedQuery]) -> Vec<StatRow> {
    let mut merged: Vec<StatRow> = Vec::with_capacity(rows.len() + tracked.len());
    let mut seen: HashSet<String> = HashSet::new();

    let existing = tracked.iter().map(StatRow::from);
    for mut row in rows.iter().cloned().chain(existing) {
        row.query = row.query.trim().to_string();
        if row.query.is_empty() || !seen.insert(row.query.clone()) {
            continue;
        }
        merged.push(row);
    }

    merged
}

/// Pure ranking logic
#[derive(Debug, Clone)]
pub struct WorkloadScorer {
    weights: ScoreWeights,
    min_score: f64,
}

impl WorkloadScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        Self {
            weights: config.weights,
            min_score: config.min_score,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn admits(&self, score: f64) -> bool {
        score > self.min_score
    }

    /// Score every row, highest first
    pub fn score(&self, rows: &[StatRow]) -> Vec<ScoredRow> {
        let column = |f: fn(&StatRow) -> f64| min_max(&rows.iter().map(f).collect::<Vec<_>>());

        let total = column(|r| r.total_exec_time);
        let mean = column(|r| r.mean_exec_time);
        let calls = column(|r| r.calls as f64);
        let blks_read = column(|r| r.shared_blks_read as f64);
        let blks_written = column(|r| r.temp_blks_written as f64);

        let w = &self.weights;
        let mut scored: Vec<ScoredRow> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| ScoredRow {
                row: row.clone(),
                score: w.total_exec_time * total[i]
                    + w.mean_exec_time * mean[i]
                    + w.calls * calls[i]
                    + w.shared_blks_read * blks_read[i]
                    + w.temp_blks_written * blks_written[i],
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    /// Rows above the admission threshold, highest first
    pub fn rank(&self, rows: &[StatRow]) -> Vec<ScoredRow> {
        self.score(rows)
            .into_iter()
            .filter(|scored| self.admits(scored.score))
            .collect()
    }

    /// Decide, per statement, whether a pass refreshes or admits it
    ///
    /// Only statements above the threshold are admitted or refreshed.
    pub fn plan(&self, rows: &[StatRow], tracked: &[TrackedQuery]) -> Vec<PlannedEntry> {
        let merged = merge_rows(rows, tracked);
        let known: HashSet<&str> = tracked.iter().map(|q| q.query.trim()).collect();

        self.score(&merged)
            .into_iter()
            .map(|scored| {
                let tracked = known.contains(scored.row.query.as_str());
                let admission = match (tracked, self.admits(scored.score)) {
                    (true, true) => Admission::Refresh,
                    (true, false) => Admission::Unchanged,
                    (false, true) => Admission::Admit,
                    (false, false) => Admission::BelowThreshold,
                };
                PlannedEntry {
                    metrics: QueryMetrics::from(&scored.row),
                    query: scored.row.query,
                    score: scored.score,
                    admission,
                }
            })
            .collect()
    }
}
