//! Shared domain types for flowline.
//!
//! Workflow definitions, execution plans, run results and the DTOs exchanged
//! with external collaborators (completion, schema validation, execution log).
//!
//! Zero engine dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod llm;
pub mod run;
pub mod validation;
pub mod workflow;
