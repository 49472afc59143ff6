//! Schema validation collaborator types.

use serde::{Deserialize, Serialize};

/// Outcome of validating a payload against a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Human-readable violations, each prefixed with the instance path.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// The schema itself could not be used.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}
