//! Executor registry: maps step type tags to executor constructors.
//!
//! New step types register a constructor under a tag; the scheduler only ever
//! sees `Arc<dyn StepExecutor>` and never matches on concrete types.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use super::step::StepExecutor;

/// Builds an executor from a step's config map.
pub type ExecutorConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn StepExecutor>, String> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("invalid config for step type '{step_type}': {message}")]
    InvalidConfig { step_type: String, message: String },
}

/// Registry of step executor constructors, indexed by type tag.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    constructors: HashMap<String, ExecutorConstructor>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `type_tag`, replacing any previous one.
    pub fn register<F>(&mut self, type_tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn StepExecutor>, String> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_tag.into(), Arc::new(constructor));
    }

    /// Construct an executor for `type_tag` from `config`.
    pub fn create(
        &self,
        type_tag: &str,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn StepExecutor>, RegistryError> {
        let constructor = self
            .constructors
            .get(type_tag)
            .ok_or_else(|| RegistryError::UnknownStepType(type_tag.to_string()))?;
        constructor(config).map_err(|message| RegistryError::InvalidConfig {
            step_type: type_tag.to_string(),
            message,
        })
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Registered type tags, sorted.
    pub fn list_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::workflow::step::{BoxFuture, StepError, StepInvocation, StepOutput};

    struct Constant(Value);

    impl StepExecutor for Constant {
        fn step_type(&self) -> &str {
            "constant"
        }

        fn validate_config(&self, _: &BTreeSet<String>) -> Result<(), String> {
            Ok(())
        }

        fn execute<'a>(&'a self, _: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
            Box::pin(async move { Ok(StepOutput::Value(self.0.clone())) })
        }
    }

    fn registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register("constant", |config: &Map<String, Value>| {
            let value = config
                .get("value")
                .cloned()
                .ok_or_else(|| "missing 'value'".to_string())?;
            Ok(Arc::new(Constant(value)) as Arc<dyn StepExecutor>)
        });
        registry
    }

    #[test]
    fn create_registered_type() {
        let config = json!({ "value": 7 }).as_object().cloned().unwrap();
        let executor = registry().create("constant", &config).unwrap();
        assert_eq!(executor.step_type(), "constant");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = registry().create("teleport", &Map::new()).err().unwrap();
        assert_eq!(err, RegistryError::UnknownStepType("teleport".to_string()));
    }

    #[test]
    fn constructor_errors_become_invalid_config() {
        let err = registry().create("constant", &Map::new()).err().unwrap();
        assert_eq!(
            err,
            RegistryError::InvalidConfig {
                step_type: "constant".to_string(),
                message: "missing 'value'".to_string(),
            }
        );
    }

    #[test]
    fn list_types_sorted() {
        let mut registry = registry();
        registry.register("alpha", |_: &Map<String, Value>| {
            Ok(Arc::new(Constant(Value::Null)) as Arc<dyn StepExecutor>)
        });
        assert_eq!(registry.list_types(), vec!["alpha", "constant"]);
        assert!(registry.contains("alpha"));
        assert!(!registry.contains("beta"));
    }
}
