//! Core data types for the ADIM metadata store
//!
//! - `TrackedQuery`: a statement registered for monitoring and index advice
//! - `Occurrence`: one observed execution of a tracked query
//! - `MaintenanceLog`: audit row for an index materialization or eviction
//! - `ForecastUpdate`: the next predicted execution of a tracked query

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate execution statistics of one statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// Total time spent executing the statement (ms)
    pub total_exec_time: f64,
    /// Mean time per execution (ms)
    pub mean_exec_time: f64,
    /// Number of executions
    pub calls: i64,
    /// Shared blocks read from disk
    pub shared_blks_read: i64,
    /// Temporary blocks written
    pub temp_blks_written: i64,
}

/// A normalized SQL statement of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedQuery {
    pub id: i64,
    /// Canonical statement text
    pub query: String,
    #[serde(flatten)]
    pub metrics: QueryMetrics,
    /// Weighted importance score (0..1)
    pub score: f64,
    /// Candidate or validated `CREATE INDEX` statements, in order
    pub indexes: Vec<String>,
    /// Seconds the last materialization of `indexes` took
    pub estimated_time_for_indexes: f64,
    /// Next predicted execution, already shifted by the safety margin
    pub next_time_execution: Option<DateTime<Utc>>,
    /// Whether the lifecycle scheduler manages this query
    pub auto_indexing: bool,
}

impl TrackedQuery {
    /// True when a forecast exists and has not been reached yet
    pub fn is_forecast_pending(&self, now: DateTime<Utc>) -> bool {
        self.next_time_execution.map(|next| next > now).unwrap_or(false)
    }
}

/// Insert-or-update payload for a tracked query, keyed by exact text
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedQueryUpsert {
    pub query: String,
    pub metrics: QueryMetrics,
    pub score: f64,
    /// `Some` replaces the stored index list; `None` keeps it
    pub indexes: Option<Vec<String>>,
}

/// One observed execution of a tracked query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: i64,
    pub tracked_query_id: i64,
    pub time_stamp: DateTime<Utc>,
    /// Set once the execution fell inside a predicted window
    pub optimized: bool,
}

/// An occurrence that has been matched but not stored yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOccurrence {
    pub tracked_query_id: i64,
    pub time_stamp: DateTime<Utc>,
}

/// Audit record of an index materialization or eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceLog {
    pub id: i64,
    pub tracked_query_id: i64,
    pub time_stamp: DateTime<Utc>,
    /// true = indexes created, false = indexes dropped
    pub index_created: bool,
}

/// Forecast produced by a lifecycle sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastUpdate {
    pub tracked_query_id: i64,
    pub next_execution_time: DateTime<Utc>,
}

impl ForecastUpdate {
    /// Render as a `/etc/cron.d` line that runs `command <id>` at the
    /// predicted minute
    pub fn cron_line(&self, command: &str) -> String {
        let at = self.next_execution_time;
        format!(
            "{} {} {} {} * root {} {}",
            at.minute(),
            at.hour(),
            at.day(),
            at.month(),
            command,
            self.tracked_query_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_line() {
        let update = ForecastUpdate {
            tracked_query_id: 7,
            next_execution_time: Utc.with_ymd_and_hms(2024, 3, 9, 4, 5, 0).unwrap(),
        };
        assert_eq!(
            update.cron_line("/app/run_and_clean.sh"),
            "5 4 9 3 * root /app/run_and_clean.sh 7"
        );
    }

    #[test]
    fn test_forecast_pending() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut query = TrackedQuery {
            id: 1,
            query: "select 1".to_string(),
            metrics: QueryMetrics::default(),
            score: 0.0,
            indexes: Vec::new(),
            estimated_time_for_indexes: 0.0,
            next_time_execution: None,
            auto_indexing: true,
        };
        assert!(!query.is_forecast_pending(now));

        query.next_time_execution = Some(now + chrono::Duration::hours(1));
        assert!(query.is_forecast_pending(now));

        query.next_time_execution = Some(now - chrono::Duration::hours(1));
        assert!(!query.is_forecast_pending(now));
    }
}
