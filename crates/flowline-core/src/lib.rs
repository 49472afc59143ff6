//! Workflow execution engine and collaborator port definitions for flowline.
//!
//! This crate defines the "ports" (repository, completion, schema validation
//! and metrics traits) that the infrastructure layer implements. It depends
//! only on `flowline-types` -- never on `flowline-infra` or any I/O crate.

pub mod llm;
pub mod metrics;
pub mod repository;
pub mod validation;
pub mod workflow;
