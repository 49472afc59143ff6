//! Filesystem-backed [`WorkflowRepository`].
//!
//! Definitions live in a single directory as `{workflow_id}.yaml`,
//! `{workflow_id}.yml` or `{workflow_id}.json`, checked in that order.

use std::path::{Path, PathBuf};

use flowline_core::repository::workflow::WorkflowRepository;
use flowline_core::workflow::definition::{parse_definition_json, parse_definition_yaml};
use flowline_types::error::RepositoryError;
use flowline_types::workflow::WorkflowDefinition;

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Reads workflow definitions from a directory.
#[derive(Debug, Clone)]
pub struct FileWorkflowRepository {
    root: PathBuf,
}

impl FileWorkflowRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids of every definition file in the directory, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| RepositoryError::Storage(format!("{}: {e}", self.root.display())))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?
        {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if let (true, Some(stem)) = (known, path.file_stem().and_then(|s| s.to_str())) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Reject ids that would escape the repository directory.
fn valid_id(workflow_id: &str) -> bool {
    !workflow_id.is_empty()
        && workflow_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !workflow_id.starts_with('.')
}

impl WorkflowRepository for FileWorkflowRepository {
    async fn get_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        if !valid_id(workflow_id) {
            return Err(RepositoryError::Malformed(format!(
                "invalid workflow id '{workflow_id}'"
            )));
        }

        for ext in EXTENSIONS {
            let path = self.root.join(format!("{workflow_id}.{ext}"));
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(RepositoryError::Storage(format!("{}: {e}", path.display())));
                }
            };

            let parsed = if ext == "json" {
                parse_definition_json(&content)
            } else {
                parse_definition_yaml(&content)
            };
            let definition = parsed
                .map_err(|e| RepositoryError::Malformed(format!("{}: {e}", path.display())))?;

            if definition.id != workflow_id {
                return Err(RepositoryError::Malformed(format!(
                    "{} declares id '{}'",
                    path.display(),
                    definition.id
                )));
            }

            tracing::debug!(workflow_id, path = %path.display(), "loaded workflow definition");
            return Ok(Some(definition));
        }

        Ok(None)
    }
}
