//! Log Matcher
//!
//! Turns raw statement logs into occurrences of tracked queries:
//!
//! 1. `parser` splits log text into timestamped statements
//! 2. the exclusion set drops tool chatter and session control
//! 3. `normalize` folds literals and whitespace on both sides
//! 4. the first tracked query (by id) whose similarity reaches the
//!    threshold wins
//!
//! All occurrences of one batch are written in one transaction.

pub mod normalize;
pub mod parser;

pub use normalize::{normalize, similarity, PLACEHOLDER};
pub use parser::{parse_log, parse_timestamp, LogEntry};

use crate::config::{ConfigError, MatcherConfig};
use crate::error::{AdimResult, Stage};
use crate::store::{MetadataStore, NewOccurrence, TrackedQuery};
use regex::{RegexSet, RegexSetBuilder};

/// One unit of raw log text, usually one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub name: String,
    pub content: String,
}

impl LogBatch {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A tracked query prepared for repeated comparison
#[derive(Debug, Clone)]
struct MatchTarget {
    id: i64,
    normalized: String,
}

/// Fuzzy matcher from logged statements to tracked queries
#[derive(Debug, Clone)]
pub struct LogMatcher {
    threshold: f64,
    exclusions: RegexSet,
}

impl LogMatcher {
    pub fn new(config: &MatcherConfig) -> AdimResult<Self> {
        let exclusions = RegexSetBuilder::new(&config.exclude_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("exclude patterns: {}", e)))?;

        Ok(Self {
            threshold: config.similarity_threshold,
            exclusions,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_excluded(&self, statement: &str) -> bool {
        self.exclusions.is_match(statement.trim())
    }

    /// Parse log text, keeping only statements that are not excluded
    pub fn entries(&self, content: &str) -> Vec<LogEntry> {
        let mut entries = parse_log(content);
        let total = entries.len();
        entries.retain(|entry| !self.is_excluded(&entry.statement));

        tracing::debug!(
            stage = %Stage::Matcher,
            total,
            kept = entries.len(),
            "Parsed log entries"
        );
        entries
    }

    fn targets(tracked: &[TrackedQuery]) -> Vec<MatchTarget> {
        let mut targets: Vec<MatchTarget> = tracked
            .iter()
            .map(|query| MatchTarget {
                id: query.id,
                normalized: normalize(&query.query),
            })
            .collect();
        targets.sort_by_key(|target| target.id);
        targets
    }

    fn best_match(&self, statement: &str, targets: &[MatchTarget]) -> Option<i64> {
        let normalized = normalize(statement);
        targets
            .iter()
            .find(|target| similarity(&normalized, &target.normalized) >= self.threshold)
            .map(|target| target.id)
    }

    /// Id of the tracked query `statement` is an execution of, if any
    pub fn match_statement(&self, statement: &str, tracked: &[TrackedQuery]) -> Option<i64> {
        self.best_match(statement, &Self::targets(tracked))
    }

    /// Occurrences for every entry that matches a tracked query
    pub fn match_entries(&self, entries: &[LogEntry], tracked: &[TrackedQuery]) -> Vec<NewOccurrence> {
        let targets = Self::targets(tracked);
        entries
            .iter()
            .filter_map(|entry| match self.best_match(&entry.statement, &targets) {
                Some(tracked_query_id) => Some(NewOccurrence {
                    tracked_query_id,
                    time_stamp: entry.timestamp,
                }),
                None => {
                    tracing::debug!(stage = %Stage::Matcher, "Unmatched statement discarded");
                    None
                }
            })
            .collect()
    }

    /// Match one batch and commit its occurrences atomically
    pub fn record_batch(
        &self,
        store: &dyn MetadataStore,
        batch: &LogBatch,
        tracked: &[TrackedQuery],
    ) -> AdimResult<usize> {
        let entries = self.entries(&batch.content);
        let occurrences = self.match_entries(&entries, tracked);
        let inserted = store.insert_occurrences(&occurrences)?;

        tracing::info!(
            stage = %Stage::Matcher,
            batch = %batch.name,
            entries = entries.len(),
            occurrences = inserted,
            "Recorded log batch"
        );
        Ok(inserted)
    }

    /// Record occurrences of tracked queries found in `batches`
    ///
    /// Returns the number of occurrences inserted. A failing batch aborts
    /// the call; batches before it stay committed.
    pub fn match_log_occurrences(
        &self,
        store: &dyn MetadataStore,
        batches: &[LogBatch],
    ) -> AdimResult<usize> {
        let tracked = store.tracked_queries()?;
        if tracked.is_empty() {
            tracing::info!(stage = %Stage::Matcher, "No tracked queries, nothing to match");
            return Ok(0);
        }

        let mut inserted = 0;
        for batch in batches {
            inserted += self.record_batch(store, batch, &tracked)?;
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdimError;
    use crate::store::{QueryMetrics, SqliteStore, TrackedQueryUpsert};
    use chrono::{TimeZone, Utc};

    fn matcher() -> LogMatcher {
        LogMatcher::new(&MatcherConfig::default()).unwrap()
    }

    fn track(store: &SqliteStore, queries: &[&str]) -> Vec<TrackedQuery> {
        let upserts: Vec<TrackedQueryUpsert> = queries
            .iter()
            .map(|q| TrackedQueryUpsert {
                query: q.to_string(),
                metrics: QueryMetrics::default(),
                score: 0.5,
                indexes: None,
            })
            .collect();
        store.upsert_tracked_queries(&upserts).unwrap()
    }

    #[test]
    fn test_exclusions() {
        let m = matcher();
        assert!(m.is_excluded("SET application_name = 'psql'"));
        assert!(m.is_excluded("commit"));
        assert!(m.is_excluded("BEGIN"));
        assert!(m.is_excluded("SELECT version()"));
        assert!(m.is_excluded("select * from pg_catalog.pg_tables"));
        assert!(m.is_excluded("/*pga4dash*/ SELECT 1"));
        assert!(!m.is_excluded("SELECT * FROM settings WHERE key = 'a'"));
        assert!(!m.is_excluded("SELECT * FROM commits"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = MatcherConfig {
            exclude_patterns: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            LogMatcher::new(&config),
            Err(AdimError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_first_match_by_id_wins() {
        let store = SqliteStore::memory().unwrap();
        let tracked = track(
            &store,
            &[
                "SELECT * FROM orders WHERE id = $1",
                "SELECT * FROM orders WHERE id = 7",
            ],
        );

        let id = matcher().match_statement("select * from orders where id = 99", &tracked);
        assert_eq!(id, Some(tracked[0].id));
        assert_eq!(
            matcher().match_statement("DELETE FROM customers", &tracked),
            None
        );
    }

    #[test]
    fn test_single_statement_log_example() {
        let store = SqliteStore::memory().unwrap();
        let tracked = track(&store, &["SELECT * FROM orders WHERE id = $1"]);

        let batch = LogBatch::new(
            "postgresql-2024-03-01.log",
            "2024-03-01 10:15:00.123 UTC [1] LOG:  statement: SELECT * FROM orders WHERE id = 5\n",
        );
        let inserted = matcher().match_log_occurrences(&store, &[batch]).unwrap();
        assert_eq!(inserted, 1);

        let stored = store.recent_occurrences(tracked[0].id, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].optimized);
        assert_eq!(
            stored[0].time_stamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }

    #[test]
    fn test_excluded_and_unmatched_skipped() {
        let store = SqliteStore::memory().unwrap();
        track(&store, &["SELECT * FROM orders WHERE id = $1"]);

        let content = "\
2024-03-01 10:15:00.000 UTC [1] LOG:  statement: BEGIN
2024-03-01 10:15:00.001 UTC [1] LOG:  statement: SELECT * FROM orders WHERE id = 1
2024-03-01 10:15:00.002 UTC [1] LOG:  statement: SELECT * FROM customers WHERE name = 'x'
2024-03-01 10:15:00.003 UTC [1] LOG:  statement: COMMIT
2024-03-01 10:15:01.000 UTC [1] LOG:  statement: SELECT * FROM orders WHERE id = 2
";
        let inserted = matcher()
            .match_log_occurrences(&store, &[LogBatch::new("a.log", content)])
            .unwrap();
        assert_eq!(inserted, 2);
    }

    const SELECT_ONE_LOG: &str = "\
2024-01-01 10:00:00.000 UTC [1] LOG: statement: SELECT 1
2024-01-01 10:00:00.250 UTC [1] LOG:  duration: 0.041 ms
";

    #[test]
    fn test_select_one_matches_literal_template() {
        let store = SqliteStore::memory().unwrap();
        let tracked = track(&store, &["SELECT 42"]);
        assert_eq!(normalize(&tracked[0].query), "select $val$");

        let inserted = matcher()
            .match_log_occurrences(&store, &[LogBatch::new("a.log", SELECT_ONE_LOG)])
            .unwrap();
        assert_eq!(inserted, 1);

        let stored = store.recent_occurrences(tracked[0].id, 10).unwrap();
        assert_eq!(
            stored[0].time_stamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_select_one_without_similar_template() {
        let store = SqliteStore::memory().unwrap();
        let tracked = track(&store, &["SELECT * FROM orders WHERE id = $1"]);

        let inserted = matcher()
            .match_log_occurrences(&store, &[LogBatch::new("a.log", SELECT_ONE_LOG)])
            .unwrap();
        assert_eq!(inserted, 0);
        assert!(store.recent_occurrences(tracked[0].id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_no_tracked_queries() {
        let store = SqliteStore::memory().unwrap();
        let batch = LogBatch::new(
            "a.log",
            "2024-03-01 10:15:00.000 UTC [1] LOG:  statement: SELECT 1\n",
        );
        assert_eq!(matcher().match_log_occurrences(&store, &[batch]).unwrap(), 0);
    }
}
