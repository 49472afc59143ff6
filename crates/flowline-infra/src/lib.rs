//! Infrastructure layer for flowline.
//!
//! Contains implementations of the collaborator traits defined in
//! `flowline-core`: a filesystem workflow repository, a JSON-lines execution
//! log, an HTTP completion provider, a JSON Schema validator, a tracing
//! metrics sink, and the TOML engine config loader.

pub mod config;
pub mod llm;
pub mod metrics;
pub mod validation;
pub mod workflow;
