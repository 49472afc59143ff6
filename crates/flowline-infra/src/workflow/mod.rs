//! Workflow collaborators backed by the local filesystem.

pub mod execution_log;
pub mod file_repository;

pub use execution_log::JsonlExecutionLog;
pub use file_repository::FileWorkflowRepository;
