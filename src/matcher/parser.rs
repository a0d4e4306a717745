//! Statement log parser
//!
//! Understands the server's default `log_line_prefix` with
//! `log_statement = 'all'`:
//!
//! ```text
//! 2024-03-01 10:15:00.123 UTC [4711] LOG:  statement: SELECT *
//!     FROM orders
//!     WHERE status = 'open'
//! 2024-03-01 10:15:00.456 UTC [4711] LOG:  duration: 0.532 ms
//! ```
//!
//! A statement line opens an entry, following lines are continuation lines
//! until the next timestamped line.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static STATEMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+ (?:[+\-]\d{4}|[A-Z]+)) \[.*?\] LOG:\s+statement:\s+(.*)$",
    )
    .expect("statement line pattern is valid")
});

static ENTRY_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+")
        .expect("entry start pattern is valid")
});

/// One logged statement execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub statement: String,
}

struct PendingEntry {
    timestamp: String,
    lines: Vec<String>,
}

impl PendingEntry {
    fn finish(self) -> Option<LogEntry> {
        let statement = self.lines.join("\n").trim().to_string();
        if statement.is_empty() {
            return None;
        }

        match parse_timestamp(&self.timestamp) {
            Some(timestamp) => Some(LogEntry {
                timestamp,
                statement,
            }),
            None => {
                tracing::warn!(timestamp = %self.timestamp, "Dropping log entry with unparseable timestamp");
                None
            }
        }
    }
}

/// Split raw log text into statement entries
pub fn parse_log(content: &str) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for line in content.lines() {
        let line = line.trim_end();

        if let Some(caps) = STATEMENT_LINE.captures(line) {
            if let Some(entry) = pending.take().and_then(PendingEntry::finish) {
                entries.push(entry);
            }
            pending = Some(PendingEntry {
                timestamp: caps[1].to_string(),
                lines: vec![caps[2].to_string()],
            });
        } else if ENTRY_START.is_match(line) {
            if let Some(entry) = pending.take().and_then(PendingEntry::finish) {
                entries.push(entry);
            }
        } else if let Some(current) = pending.as_mut() {
            current.lines.push(line.trim().to_string());
        }
    }

    if let Some(entry) = pending.and_then(PendingEntry::finish) {
        entries.push(entry);
    }

    entries
}

/// Parse `YYYY-MM-DD HH:MM:SS.fff <zone>` into a UTC instant
///
/// Numeric offsets (`+0530`) are honoured. Alphabetic zone names are taken
/// as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (local, zone) = raw.trim().rsplit_once(' ')?;

    if zone.starts_with('+') || zone.starts_with('-') {
        return DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f %z")
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }

    if !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if zone != "UTC" && zone != "GMT" {
        tracing::debug!(zone, "Interpreting log time zone abbreviation as UTC");
    }

    NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_single_statement() {
        let content = "2024-03-01 10:15:00.123 UTC [1] LOG:  statement: SELECT * FROM orders WHERE id = 5\n";
        let entries = parse_log(content);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].statement, "SELECT * FROM orders WHERE id = 5");
        assert_eq!(
            entries[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }

    #[test]
    fn test_continuation_lines() {
        let content = "\
2024-03-01 10:15:00.000 UTC [1] LOG:  statement: SELECT *
    FROM orders
    WHERE status = 'open'
2024-03-01 10:15:00.500 UTC [1] LOG:  duration: 0.532 ms
    this line belongs to no statement
2024-03-01 10:16:00.000 UTC [2] LOG:  statement: SELECT 1
";
        let entries = parse_log(content);

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].statement,
            "SELECT *\nFROM orders\nWHERE status = 'open'"
        );
        assert_eq!(entries[1].statement, "SELECT 1");
    }

    #[test]
    fn test_consecutive_statements() {
        let content = "\
2024-03-01 10:15:00.000 UTC [1] LOG:  statement: BEGIN
2024-03-01 10:15:00.001 UTC [1] LOG:  statement: UPDATE t SET a = 1
";
        let statements: Vec<String> = parse_log(content)
            .into_iter()
            .map(|e| e.statement)
            .collect();
        assert_eq!(statements, vec!["BEGIN", "UPDATE t SET a = 1"]);
    }

    #[test]
    fn test_numeric_offset() {
        let ts = parse_timestamp("2024-03-01 15:45:00.000 +0530").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_zone_abbreviation_as_utc() {
        let ts = parse_timestamp("2024-03-01 10:15:00.250 CET").unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
                + chrono::Duration::milliseconds(250)
        );
        assert!(parse_timestamp("2024-13-01 10:15:00.250 UTC").is_none());
    }

    #[test]
    fn test_unparseable_timestamp_dropped() {
        let content = "2024-02-30 10:15:00.000 UTC [1] LOG:  statement: SELECT 1\n";
        assert!(parse_log(content).is_empty());
    }

    #[test]
    fn test_leading_noise_ignored() {
        let content = "random preamble\n\tmore noise\n";
        assert!(parse_log(content).is_empty());
    }
}
