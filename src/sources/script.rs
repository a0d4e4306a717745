//! DDL script writer
//!
//! Stands in for a live schema executor: every statement is appended to a
//! SQL script that an operator can review and apply.

use crate::sources::{SchemaExecutor, SourceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends DDL to a script file instead of executing it
#[derive(Debug)]
pub struct ScriptSchemaExecutor {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ScriptSchemaExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SchemaExecutor for ScriptSchemaExecutor {
    fn name(&self) -> &str {
        "script"
    }

    async fn execute(&self, ddl: &str) -> Result<(), SourceError> {
        let ddl = ddl.trim();
        if ddl.is_empty() {
            return Err(SourceError::Rejected("empty statement".to_string()));
        }

        let mut line = ddl.to_string();
        if !line.ends_with(';') {
            line.push(';');
        }
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(path = ?self.path, statement = ddl, "Recorded DDL");
        Ok(())
    }
}
