//! HttpCompletionProvider -- [`CompletionProvider`] for OpenAI-compatible
//! chat completion endpoints (`{endpoint}/chat/completions`).
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output. HTTP failures are mapped onto
//! [`CompletionError`] so the retry coordinator can classify them.

use std::time::Duration;

use flowline_core::llm::provider::CompletionProvider;
use flowline_types::config::CompletionConfig;
use flowline_types::llm::{Completion, CompletionError, TokenUsage};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Completion provider speaking the OpenAI chat completions protocol.
///
/// Does NOT derive Debug: the key stays out of every formatted output.
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
}

impl HttpCompletionProvider {
    /// Build a provider from config. `api_key` may be `None` for local
    /// endpoints that do not authenticate.
    pub fn new(config: &CompletionConfig, api_key: Option<SecretString>) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("flowline/0.1")
            .build()
            .map_err(|e| CompletionError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

impl CompletionProvider for HttpCompletionProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, prompt: &str, model: &str) -> Result<Completion, CompletionError> {
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout
            } else {
                CompletionError::Transport(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = retry_after_ms(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), model, "completion request rejected");
            return Err(map_status(status, retry_after_ms, error_body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Deserialization(format!("failed to parse response: {e}")))?;
        into_completion(parsed, model)
    }
}

fn map_status(status: StatusCode, retry_after_ms: Option<u64>, body: String) -> CompletionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::AuthenticationFailed,
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited { retry_after_ms },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CompletionError::Timeout,
        _ => CompletionError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

/// `Retry-After` in whole seconds, converted to milliseconds.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

fn into_completion(response: ChatResponse, requested_model: &str) -> Result<Completion, CompletionError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CompletionError::Deserialization("response contained no choices".to_string()))?;
    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}
