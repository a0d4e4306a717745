//! Engine error types
//!
//! Every user-visible failure names the pipeline stage it came from and,
//! where one is involved, the tracked query.

use crate::config::ConfigError;
use crate::sources::SourceError;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage an error or log event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Matcher,
    Scorer,
    Advisor,
    Scheduler,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Matcher => "matcher",
            Stage::Scorer => "scorer",
            Stage::Advisor => "advisor",
            Stage::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn query_suffix(tracked_query_id: &Option<i64>) -> String {
    match tracked_query_id {
        Some(id) => format!(" (tracked query {})", id),
        None => String::new(),
    }
}

/// Errors surfaced by the ADIM engine
#[derive(Error, Debug)]
pub enum AdimError {
    /// Malformed or unsupported SQL; fails one statement only
    #[error("[{stage}] parse error{}: {message}", query_suffix(.tracked_query_id))]
    Parse {
        stage: Stage,
        tracked_query_id: Option<i64>,
        message: String,
    },

    /// DDL against the observed database was rejected
    #[error("[{stage}] schema operation failed{}: {statement}: {message}", query_suffix(.tracked_query_id))]
    SchemaOperation {
        stage: Stage,
        tracked_query_id: Option<i64>,
        statement: String,
        message: String,
    },

    /// A collaborator could not be reached; aborts the current pass
    #[error("[{stage}] external source {source_name} failed: {message}")]
    ExternalSource {
        stage: Stage,
        source_name: String,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tracked query {0} not found")]
    TrackedQueryNotFound(i64),

    #[error("Tracked query {0} has no indexes")]
    NoIndexes(i64),

    #[error("[advisor] invalid index statement: {0}")]
    InvalidIndexStatement(String),

    #[error("[advisor] tracked query {tracked_query_id} already has index {name}")]
    DuplicateIndex { tracked_query_id: i64, name: String },

    #[error("Tracked query {tracked_query_id} has no index {name}")]
    IndexNotFound { tracked_query_id: i64, name: String },

    #[error("[scorer] statement {0} not found in statistics source")]
    StatementNotFound(String),

    #[error("[scheduler] no forecasts were updated")]
    NoForecastsUpdated,

    #[error("[scorer] nothing to score")]
    NothingToScore,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AdimError {
    pub fn parse(stage: Stage, tracked_query_id: Option<i64>, message: impl Into<String>) -> Self {
        AdimError::Parse {
            stage,
            tracked_query_id,
            message: message.into(),
        }
    }

    pub fn schema(
        stage: Stage,
        tracked_query_id: Option<i64>,
        statement: impl Into<String>,
        err: SourceError,
    ) -> Self {
        AdimError::SchemaOperation {
            stage,
            tracked_query_id,
            statement: statement.into(),
            message: err.to_string(),
        }
    }

    pub fn external(stage: Stage, source_name: impl Into<String>, err: SourceError) -> Self {
        AdimError::ExternalSource {
            stage,
            source_name: source_name.into(),
            message: err.to_string(),
        }
    }

    /// Stage the error originated in, when it is stage-specific
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AdimError::Parse { stage, .. }
            | AdimError::SchemaOperation { stage, .. }
            | AdimError::ExternalSource { stage, .. } => Some(*stage),
            AdimError::InvalidIndexStatement(_) | AdimError::DuplicateIndex { .. } => {
                Some(Stage::Advisor)
            }
            AdimError::StatementNotFound(_) | AdimError::NothingToScore => Some(Stage::Scorer),
            AdimError::NoForecastsUpdated => Some(Stage::Scheduler),
            _ => None,
        }
    }

    pub fn tracked_query_id(&self) -> Option<i64> {
        match self {
            AdimError::Parse {
                tracked_query_id, ..
            }
            | AdimError::SchemaOperation {
                tracked_query_id, ..
            } => *tracked_query_id,
            AdimError::TrackedQueryNotFound(id) | AdimError::NoIndexes(id) => Some(*id),
            AdimError::DuplicateIndex {
                tracked_query_id, ..
            }
            | AdimError::IndexNotFound {
                tracked_query_id, ..
            } => Some(*tracked_query_id),
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type AdimResult<T> = Result<T, AdimError>;
