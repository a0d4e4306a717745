//! Occurrence matching

use super::AdimEngine;
use crate::error::{AdimError, AdimResult, Stage};
use crate::matcher::LogBatch;
use crate::sources::LogSource;
use crate::store::MetadataStore;

impl AdimEngine {
    /// Record occurrences of tracked queries found in `batches`
    pub fn match_log_occurrences(&self, batches: &[LogBatch]) -> AdimResult<usize> {
        self.matcher.match_log_occurrences(&self.store, batches)
    }

    /// Drain a log source: list, read, match, commit, delete
    ///
    /// A log is deleted only after its occurrences are committed. A failed
    /// delete is logged and the log will be read again next time.
    pub async fn process_log_source(&self, source: &dyn LogSource) -> AdimResult<usize> {
        let external = |e| AdimError::external(Stage::Matcher, source.name(), e);

        let names = source.list().await.map_err(external)?;
        let tracked = self.store.tracked_queries()?;

        let mut inserted = 0;
        for name in &names {
            let content = source.read(name).await.map_err(external)?;
            inserted += self
                .matcher
                .record_batch(&self.store, &LogBatch::new(name.as_str(), content), &tracked)?;

            if let Err(e) = source.delete(name).await {
                tracing::warn!(
                    stage = %Stage::Matcher,
                    source = source.name(),
                    log = %name,
                    error = %e,
                    "Failed to delete processed log"
                );
            }
        }

        tracing::info!(
            stage = %Stage::Matcher,
            source = source.name(),
            logs = names.len(),
            occurrences = inserted,
            "Log source processed"
        );
        Ok(inserted)
    }
}
