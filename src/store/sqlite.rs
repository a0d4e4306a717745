//! SQLite-backed metadata store
//!
//! One connection behind a mutex; multi-row writes run in a single
//! transaction. Timestamps are stored as unix milliseconds, index lists as a
//! JSON text array.

use crate::scheduler::forecast::{ArtifactStore, ForecastArtifact, StoredArtifact};
use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{
    ForecastUpdate, MaintenanceLog, NewOccurrence, Occurrence, QueryMetrics, TrackedQuery,
    TrackedQueryUpsert,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tc_queries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL UNIQUE,
        total_exec_time REAL NOT NULL DEFAULT 0,
        mean_exec_time REAL NOT NULL DEFAULT 0,
        calls INTEGER NOT NULL DEFAULT 0,
        shared_blks_read INTEGER NOT NULL DEFAULT 0,
        temp_blks_written INTEGER NOT NULL DEFAULT 0,
        score REAL NOT NULL DEFAULT 0,
        indexes TEXT NOT NULL DEFAULT '[]',
        estimated_time_for_indexes REAL NOT NULL DEFAULT 0,
        next_time_execution INTEGER,
        auto_indexing INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS query_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tc_query_id INTEGER NOT NULL REFERENCES tc_queries(id) ON DELETE CASCADE,
        time_stamp INTEGER NOT NULL,
        optimized INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_query_logs_query_time
        ON query_logs(tc_query_id, time_stamp);

    CREATE TABLE IF NOT EXISTS index_maintenance_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tc_query_id INTEGER NOT NULL REFERENCES tc_queries(id) ON DELETE CASCADE,
        time_stamp INTEGER NOT NULL,
        index_created INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_maintenance_query
        ON index_maintenance_logs(tc_query_id);

    CREATE TABLE IF NOT EXISTS forecast_artifacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tc_query_id INTEGER NOT NULL REFERENCES tc_queries(id) ON DELETE CASCADE,
        artifact TEXT NOT NULL,
        score REAL NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_artifacts_query_score
        ON forecast_artifacts(tc_query_id, score);
";

const TRACKED_COLUMNS: &str = "id, query, total_exec_time, mean_exec_time, calls, \
     shared_blks_read, temp_blks_written, score, indexes, estimated_time_for_indexes, \
     next_time_execution, auto_indexing";

/// Metadata store over a single SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, mostly for tests and dry runs
    pub fn memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = ?path, "Metadata store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Deposit a trained artifact for a tracked query; returns its row id
    pub fn store_artifact(&self, tracked_query_id: i64, artifact: &StoredArtifact) -> StoreResult<i64> {
        let json = serde_json::to_string(artifact)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO forecast_artifacts (tc_query_id, artifact, score, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                tracked_query_id,
                json,
                artifact.score,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn best_stored_artifact(&self, tracked_query_id: i64) -> StoreResult<Option<StoredArtifact>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .prepare_cached(
                "SELECT artifact FROM forecast_artifacts
                 WHERE tc_query_id = ?1
                 ORDER BY score DESC, created_at DESC, id DESC
                 LIMIT 1",
            )?
            .query_row(params![tracked_query_id], |row| row.get(0))
            .optional()?;

        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}

/// Raw `tc_queries` row, converted outside the rusqlite closure
struct TrackedRow {
    id: i64,
    query: String,
    metrics: QueryMetrics,
    score: f64,
    indexes: String,
    estimated_time_for_indexes: f64,
    next_time_execution: Option<i64>,
    auto_indexing: bool,
}

impl TrackedRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            query: row.get(1)?,
            metrics: QueryMetrics {
                total_exec_time: row.get(2)?,
                mean_exec_time: row.get(3)?,
                calls: row.get(4)?,
                shared_blks_read: row.get(5)?,
                temp_blks_written: row.get(6)?,
            },
            score: row.get(7)?,
            indexes: row.get(8)?,
            estimated_time_for_indexes: row.get(9)?,
            next_time_execution: row.get(10)?,
            auto_indexing: row.get(11)?,
        })
    }

    fn into_tracked(self) -> StoreResult<TrackedQuery> {
        Ok(TrackedQuery {
            id: self.id,
            query: self.query,
            metrics: self.metrics,
            score: self.score,
            indexes: serde_json::from_str(&self.indexes)?,
            estimated_time_for_indexes: self.estimated_time_for_indexes,
            next_time_execution: self.next_time_execution.map(from_millis).transpose()?,
            auto_indexing: self.auto_indexing,
        })
    }
}

struct OccurrenceRow {
    id: i64,
    tracked_query_id: i64,
    time_stamp: i64,
    optimized: bool,
}

impl OccurrenceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tracked_query_id: row.get(1)?,
            time_stamp: row.get(2)?,
            optimized: row.get(3)?,
        })
    }

    fn into_occurrence(self) -> StoreResult<Occurrence> {
        Ok(Occurrence {
            id: self.id,
            tracked_query_id: self.tracked_query_id,
            time_stamp: from_millis(self.time_stamp)?,
            optimized: self.optimized,
        })
    }
}

fn select_tracked(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<TrackedQuery>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, TrackedRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(TrackedRow::into_tracked).collect()
}

fn select_occurrences(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Occurrence>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, OccurrenceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
}

fn insert_maintenance_log(
    conn: &Connection,
    id: i64,
    at: DateTime<Utc>,
    index_created: bool,
) -> StoreResult<MaintenanceLog> {
    conn.execute(
        "INSERT INTO index_maintenance_logs (tc_query_id, time_stamp, index_created)
         VALUES (?1, ?2, ?3)",
        params![id, at.timestamp_millis(), index_created],
    )?;
    Ok(MaintenanceLog {
        id: conn.last_insert_rowid(),
        tracked_query_id: id,
        time_stamp: from_millis(at.timestamp_millis())?,
        index_created,
    })
}

impl MetadataStore for SqliteStore {
    fn tracked_queries(&self) -> StoreResult<Vec<TrackedQuery>> {
        let conn = self.lock()?;
        select_tracked(
            &conn,
            &format!("SELECT {} FROM tc_queries ORDER BY id", TRACKED_COLUMNS),
            [],
        )
    }

    fn auto_indexed_queries(&self) -> StoreResult<Vec<TrackedQuery>> {
        let conn = self.lock()?;
        select_tracked(
            &conn,
            &format!(
                "SELECT {} FROM tc_queries WHERE auto_indexing = 1 ORDER BY id",
                TRACKED_COLUMNS
            ),
            [],
        )
    }

    fn tracked_query(&self, id: i64) -> StoreResult<Option<TrackedQuery>> {
        let conn = self.lock()?;
        let mut rows = select_tracked(
            &conn,
            &format!("SELECT {} FROM tc_queries WHERE id = ?1", TRACKED_COLUMNS),
            params![id],
        )?;
        Ok(rows.pop())
    }

    fn upsert_tracked_queries(
        &self,
        entries: &[TrackedQueryUpsert],
    ) -> StoreResult<Vec<TrackedQuery>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(entries.len());

        for entry in entries {
            let m = &entry.metrics;
            let existing: Option<i64> = tx
                .prepare_cached("SELECT id FROM tc_queries WHERE query = ?1")?
                .query_row(params![entry.query], |row| row.get(0))
                .optional()?;

            let id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE tc_queries SET total_exec_time = ?2, mean_exec_time = ?3,
                             calls = ?4, shared_blks_read = ?5, temp_blks_written = ?6,
                             score = ?7
                         WHERE id = ?1",
                        params![
                            id,
                            m.total_exec_time,
                            m.mean_exec_time,
                            m.calls,
                            m.shared_blks_read,
                            m.temp_blks_written,
                            entry.score
                        ],
                    )?;
                    if let Some(indexes) = &entry.indexes {
                        tx.execute(
                            "UPDATE tc_queries SET indexes = ?2 WHERE id = ?1",
                            params![id, serde_json::to_string(indexes)?],
                        )?;
                    }
                    id
                }
                None => {
                    let indexes = entry.indexes.clone().unwrap_or_default();
                    tx.execute(
                        "INSERT INTO tc_queries (query, total_exec_time, mean_exec_time,
                             calls, shared_blks_read, temp_blks_written, score, indexes)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            entry.query,
                            m.total_exec_time,
                            m.mean_exec_time,
                            m.calls,
                            m.shared_blks_read,
                            m.temp_blks_written,
                            entry.score,
                            serde_json::to_string(&indexes)?
                        ],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            ids.push(id);
        }

        let sql = format!("SELECT {} FROM tc_queries WHERE id = ?1", TRACKED_COLUMNS);
        let mut stored = Vec::with_capacity(ids.len());
        for id in ids {
            stored.extend(select_tracked(&tx, &sql, params![id])?);
        }

        tx.commit()?;
        Ok(stored)
    }

    fn delete_tracked_query(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM tc_queries WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn update_indexes(&self, id: i64, indexes: &[String]) -> StoreResult<bool> {
        let json = serde_json::to_string(indexes)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tc_queries SET indexes = ?2 WHERE id = ?1",
            params![id, json],
        )?;
        Ok(changed > 0)
    }

    fn set_auto_indexing(&self, id: i64, enabled: bool) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tc_queries SET auto_indexing = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        Ok(changed > 0)
    }

    fn insert_occurrences(&self, occurrences: &[NewOccurrence]) -> StoreResult<usize> {
        if occurrences.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO query_logs (tc_query_id, time_stamp, optimized) VALUES (?1, ?2, 0)",
            )?;
            for occurrence in occurrences {
                stmt.execute(params![
                    occurrence.tracked_query_id,
                    occurrence.time_stamp.timestamp_millis()
                ])?;
            }
        }
        tx.commit()?;

        Ok(occurrences.len())
    }

    fn recent_occurrences(&self, id: i64, limit: usize) -> StoreResult<Vec<Occurrence>> {
        let conn = self.lock()?;
        select_occurrences(
            &conn,
            "SELECT id, tc_query_id, time_stamp, optimized FROM query_logs
             WHERE tc_query_id = ?1
             ORDER BY time_stamp DESC, id DESC
             LIMIT ?2",
            params![id, limit as i64],
        )
    }

    fn occurrences_since(
        &self,
        id: i64,
        since: DateTime<Utc>,
        optimized: Option<bool>,
    ) -> StoreResult<Vec<Occurrence>> {
        let conn = self.lock()?;
        select_occurrences(
            &conn,
            "SELECT id, tc_query_id, time_stamp, optimized FROM query_logs
             WHERE tc_query_id = ?1 AND time_stamp >= ?2
               AND (?3 IS NULL OR optimized = ?3)
             ORDER BY time_stamp ASC, id ASC",
            params![id, since.timestamp_millis(), optimized],
        )
    }

    fn record_forecast(
        &self,
        id: i64,
        at: DateTime<Utc>,
        next_time_execution: DateTime<Utc>,
        optimized: &[i64],
    ) -> StoreResult<MaintenanceLog> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let log = insert_maintenance_log(&tx, id, at, false)?;
        tx.execute(
            "UPDATE tc_queries SET next_time_execution = ?2 WHERE id = ?1",
            params![id, next_time_execution.timestamp_millis()],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE query_logs SET optimized = 1 WHERE id = ?1 AND tc_query_id = ?2",
            )?;
            for occurrence in optimized {
                stmt.execute(params![occurrence, id])?;
            }
        }
        tx.commit()?;

        Ok(log)
    }

    fn record_materialization(
        &self,
        id: i64,
        at: DateTime<Utc>,
        elapsed_secs: f64,
    ) -> StoreResult<MaintenanceLog> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let log = insert_maintenance_log(&tx, id, at, true)?;
        tx.execute(
            "UPDATE tc_queries SET estimated_time_for_indexes = ?2 WHERE id = ?1",
            params![id, elapsed_secs],
        )?;
        tx.commit()?;

        Ok(log)
    }

    fn append_maintenance_log(
        &self,
        id: i64,
        at: DateTime<Utc>,
        index_created: bool,
    ) -> StoreResult<MaintenanceLog> {
        let conn = self.lock()?;
        insert_maintenance_log(&conn, id, at, index_created)
    }

    fn maintenance_logs(&self, id: i64) -> StoreResult<Vec<MaintenanceLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, tc_query_id, time_stamp, index_created FROM index_maintenance_logs
             WHERE tc_query_id = ?1
             ORDER BY time_stamp ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, tracked_query_id, ts, index_created)| {
                Ok(MaintenanceLog {
                    id,
                    tracked_query_id,
                    time_stamp: from_millis(ts)?,
                    index_created,
                })
            })
            .collect()
    }

    fn scheduled_forecasts(&self, after: DateTime<Utc>) -> StoreResult<Vec<ForecastUpdate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, next_time_execution FROM tc_queries
             WHERE next_time_execution IS NOT NULL AND next_time_execution > ?1
             ORDER BY next_time_execution ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![after.timestamp_millis()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(tracked_query_id, ms)| {
                Ok(ForecastUpdate {
                    tracked_query_id,
                    next_execution_time: from_millis(ms)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn best_artifact(&self, tracked_query_id: i64) -> StoreResult<Option<ForecastArtifact>> {
        Ok(self
            .best_stored_artifact(tracked_query_id)?
            .map(ForecastArtifact::from))
    }
}
