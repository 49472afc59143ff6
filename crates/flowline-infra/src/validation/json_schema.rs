//! JSON Schema [`SchemaValidator`] backed by the `jsonschema` crate.

use flowline_core::validation::SchemaValidator;
use flowline_types::validation::{SchemaError, ValidationReport};
use serde_json::Value;

/// Validates payloads against JSON Schema documents (draft auto-detected).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, payload: &Value) -> Result<ValidationReport, SchemaError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        if errors.is_empty() {
            Ok(ValidationReport::ok())
        } else {
            Ok(ValidationReport::invalid(errors))
        }
    }

    fn check_schema(&self, schema: &Value) -> Result<(), SchemaError> {
        jsonschema::validator_for(schema)
            .map(|_| ())
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))
    }
}
