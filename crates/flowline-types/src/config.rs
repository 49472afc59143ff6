//! Engine configuration types.
//!
//! `EngineConfig` represents the `flowline.toml` file that controls the
//! default retry policy, execution limits, and the completion endpoint.
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicyConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default retry policy for steps without an override.
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Run-level execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-attempt timeout for steps without `timeout_ms` (default 300 s).
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Whole-run timeout (default 1800 s).
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Maximum steps running at once within a batch. `0` means unbounded.
    #[serde(default)]
    pub max_parallelism: usize,

    /// Seed for backoff jitter. Unset means seeded from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_seed: Option<u64>,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    1800
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            max_parallelism: 0,
            jitter_seed: None,
        }
    }
}

/// HTTP completion endpoint settings used by AI invocation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used when a step does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "FLOWLINE_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            default_model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.execution.step_timeout_secs, 300);
        assert_eq!(config.execution.max_parallelism, 0);
        assert!(config.execution.jitter_seed.is_none());
        assert_eq!(config.completion.api_key_env, "FLOWLINE_API_KEY");
    }

    #[test]
    fn test_engine_config_deserialize_empty() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
[retry]
max_attempts = 5
base_delay_ms = 250
jitter = false

[execution]
max_parallelism = 4
jitter_seed = 7

[completion]
endpoint = "http://localhost:11434/v1"
default_model = "llama3"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert!(!config.retry.jitter);
        assert_eq!(config.execution.max_parallelism, 4);
        assert_eq!(config.execution.jitter_seed, Some(7));
        assert_eq!(config.execution.run_timeout_secs, 1800);
        assert_eq!(config.completion.default_model, "llama3");
        assert_eq!(config.completion.request_timeout_secs, 60);
    }
}
