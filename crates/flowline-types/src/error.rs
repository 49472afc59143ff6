use thiserror::Error;

/// Errors from the workflow repository collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed definition: {0}")]
    Malformed(String),
}

/// Errors from the execution log collaborator.
#[derive(Debug, Error)]
pub enum ExecutionLogError {
    #[error("failed to serialize run result: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::NotFound("nightly".to_string());
        assert_eq!(err.to_string(), "workflow not found: nightly");
    }

    #[test]
    fn test_execution_log_error_display() {
        let err = ExecutionLogError::Storage("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }
}
