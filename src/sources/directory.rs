//! Directory-backed log source
//!
//! Every file with the configured extension is one log batch. Names are
//! returned sorted, which for the server's default `postgresql-%Y-%m-%d_%H%M%S`
//! file names is chronological.

use crate::sources::{LogSource, SourceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Reads statement logs from a directory
#[derive(Debug, Clone)]
pub struct DirectoryLogSource {
    dir: PathBuf,
    extension: String,
}

impl DirectoryLogSource {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a log name, refusing anything that escapes the directory
    fn resolve(&self, name: &str) -> Result<PathBuf, SourceError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(SourceError::Rejected(format!("invalid log name {:?}", name)));
        }
        Ok(self.dir.join(name))
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy() == self.extension.as_str())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LogSource for DirectoryLogSource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list(&self) -> Result<Vec<String>, SourceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = ?self.dir, "Log directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !self.has_extension(&path) {
                continue;
            }
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<String, SourceError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            // Server logs may carry statement text in any client encoding
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), SourceError> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
