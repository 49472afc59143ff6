//! Built-in step executors.
//!
//! | tag           | executor               |
//! |---------------|------------------------|
//! | `input`       | [`InputExecutor`]      |
//! | `transform`   | [`TransformExecutor`]  |
//! | `ai`          | [`AiExecutor`]         |
//! | `validation`  | [`ValidationExecutor`] |
//! | `output`      | [`OutputExecutor`]     |
//! | `conditional` | [`ConditionalExecutor`]|

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::llm::box_provider::BoxCompletionProvider;
use crate::validation::SchemaValidator;

use super::registry::ExecutorRegistry;
use super::step::StepExecutor;

pub mod ai;
pub mod conditional;
pub mod input;
pub mod output;
pub mod transform;
pub mod validation;

pub use ai::AiExecutor;
pub use conditional::ConditionalExecutor;
pub use input::InputExecutor;
pub use output::OutputExecutor;
pub use transform::TransformExecutor;
pub use validation::ValidationExecutor;

/// Collaborators the built-in executors need.
#[derive(Clone)]
pub struct BuiltinServices {
    pub completion: Arc<BoxCompletionProvider>,
    pub schema_validator: Arc<dyn SchemaValidator>,
    /// Model used by AI steps that do not name one.
    pub default_model: String,
}

/// Register every built-in executor.
pub fn register_builtins(registry: &mut ExecutorRegistry, services: BuiltinServices) {
    registry.register(input::STEP_TYPE, |config: &Map<String, Value>| {
        Ok(Arc::new(InputExecutor::from_config(config)?) as Arc<dyn StepExecutor>)
    });
    registry.register(transform::STEP_TYPE, |config: &Map<String, Value>| {
        Ok(Arc::new(TransformExecutor::from_config(config)?) as Arc<dyn StepExecutor>)
    });
    registry.register(output::STEP_TYPE, |config: &Map<String, Value>| {
        Ok(Arc::new(OutputExecutor::from_config(config)?) as Arc<dyn StepExecutor>)
    });
    registry.register(conditional::STEP_TYPE, |config: &Map<String, Value>| {
        Ok(Arc::new(ConditionalExecutor::from_config(config)?) as Arc<dyn StepExecutor>)
    });

    let completion = Arc::clone(&services.completion);
    let default_model = services.default_model.clone();
    registry.register(ai::STEP_TYPE, move |config: &Map<String, Value>| {
        let executor =
            AiExecutor::from_config(config, Arc::clone(&completion), &default_model)?;
        Ok(Arc::new(executor) as Arc<dyn StepExecutor>)
    });

    let validator = Arc::clone(&services.schema_validator);
    registry.register(validation::STEP_TYPE, move |config: &Map<String, Value>| {
        let executor = ValidationExecutor::from_config(config, Arc::clone(&validator))?;
        Ok(Arc::new(executor) as Arc<dyn StepExecutor>)
    });
}

/// Deserialize a step config map into a typed config struct.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| e.to_string())
}
