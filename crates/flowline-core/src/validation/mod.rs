//! Schema validation port used by validation steps.
//!
//! The infrastructure layer implements this with JSON Schema
//! (`flowline_infra::validation::JsonSchemaValidator`).

use flowline_types::validation::{SchemaError, ValidationReport};
use serde_json::Value;

/// Validates a payload against a schema document.
///
/// Synchronous: validation is CPU-bound and never touches I/O.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &Value, payload: &Value) -> Result<ValidationReport, SchemaError>;

    /// Check that `schema` itself is usable. Called during pre-flight.
    fn check_schema(&self, schema: &Value) -> Result<(), SchemaError>;
}
