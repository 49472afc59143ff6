//! Engine configuration loader.
//!
//! Reads a TOML file and deserializes it into [`EngineConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::Path;

use flowline_types::config::EngineConfig;
use secrecy::SecretString;

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Read the completion API key from the environment variable named in config.
pub fn completion_api_key(config: &EngineConfig) -> Option<SecretString> {
    std::env::var(&config.completion.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join("flowline.toml")).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flowline.toml");
        tokio::fs::write(
            &path,
            r#"
[retry]
max_attempts = 5
base_delay_ms = 250

[execution]
max_parallelism = 4
jitter_seed = 7

[completion]
default_model = "local-model"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.execution.max_parallelism, 4);
        assert_eq!(config.execution.jitter_seed, Some(7));
        assert_eq!(config.execution.step_timeout_secs, 300);
        assert_eq!(config.completion.default_model, "local-model");
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flowline.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config, EngineConfig::default());
    }
}
