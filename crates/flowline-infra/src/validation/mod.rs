//! Schema validator implementations.

pub mod json_schema;

pub use json_schema::JsonSchemaValidator;
