//! Append-only JSON-lines [`ExecutionLog`].
//!
//! Each completed run becomes one line in the log file. Appends are
//! serialized through an async mutex so concurrent runs never interleave
//! partial lines.

use std::path::{Path, PathBuf};

use flowline_core::repository::workflow::ExecutionLog;
use flowline_types::error::ExecutionLogError;
use flowline_types::run::RunResult;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct JsonlExecutionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlExecutionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every persisted run, oldest first.
    pub async fn read_all(&self) -> Result<Vec<RunResult>, ExecutionLogError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ExecutionLogError::Storage(e.to_string())),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| ExecutionLogError::Serialization(e.to_string()))
            })
            .collect()
    }
}

impl ExecutionLog for JsonlExecutionLog {
    async fn persist(&self, result: &RunResult) -> Result<(), ExecutionLogError> {
        let mut line = serde_json::to_string(result)
            .map_err(|e| ExecutionLogError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExecutionLogError::Storage(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ExecutionLogError::Storage(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ExecutionLogError::Storage(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ExecutionLogError::Storage(e.to_string()))?;

        tracing::debug!(run_id = %result.run_id, path = %self.path.display(), "persisted run result");
        Ok(())
    }
}
