//! Text transformation providers.
//!
//! `TransformProvider` is the only thing the pipeline knows about a
//! backend. Each implementation owns its wire format and maps every
//! failure into [`TransformError`], and enforces the request timeout
//! itself.

pub mod gemini;
pub mod openrouter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::{ConfigError, ProviderConfig, ProviderKind, TransformConfig};

/// Longest error body excerpt carried in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Generation parameters for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_output_tokens: u32,
    pub provider_id: String,
    pub model_id: String,
}

impl ModelParams {
    pub fn from_config(provider: &ProviderConfig, transform: &TransformConfig) -> Self {
        Self {
            temperature: transform.temperature,
            top_p: transform.top_p(),
            max_output_tokens: transform.max_output_tokens,
            provider_id: provider.kind.id().to_string(),
            model_id: provider.model().to_string(),
        }
    }
}

/// Captured text plus everything needed to transform it. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    source_text: String,
    prompt_template: String,
    params: ModelParams,
}

impl TransformRequest {
    pub fn new(source_text: String, prompt_template: String, params: ModelParams) -> Self {
        Self {
            source_text,
            prompt_template,
            params,
        }
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// The text sent to the model. A `{text}` placeholder in the
    /// template is substituted; otherwise the source text is appended.
    pub fn prompt_text(&self) -> String {
        if self.prompt_template.contains("{text}") {
            self.prompt_template.replace("{text}", &self.source_text)
        } else {
            format!(
                "{}\n\nText to process: {}",
                self.prompt_template, self.source_text
            )
        }
    }
}

/// Successful transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub text: String,
    /// `provider`, `model`, and when reported `finish_reason` and
    /// `model_version`.
    pub provider_metadata: BTreeMap<String, String>,
}

/// Backend-independent provider failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("request timed out after {}s", .0.as_secs_f32())]
    NetworkTimeout(Duration),
    /// Connection refused/reset, DNS failure, truncated body.
    #[error("network error: {0}")]
    Transport(String),
    /// 5xx.
    #[error("provider error {status}: {message}")]
    Server { status: u16, message: String },
    /// Any other non-success status (bad key, bad request, quota).
    #[error("request rejected {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransformError {
    /// Timeouts, transport failures and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransformError::NetworkTimeout(_)
                | TransformError::Transport(_)
                | TransformError::Server { .. }
        )
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message(body);
        if (500..600).contains(&status) {
            TransformError::Server { status, message }
        } else {
            TransformError::Rejected { status, message }
        }
    }

    fn transport(e: reqwest::Error) -> Self {
        TransformError::Transport(e.to_string())
    }
}

/// Pull `error.message` out of a JSON error body, else a bounded excerpt.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string));

    match from_json {
        Some(m) => m,
        None => {
            let trimmed = body.trim();
            match trimmed.char_indices().nth(MAX_ERROR_BODY) {
                Some((cut, _)) => format!("{}...", &trimmed[..cut]),
                None => trimmed.to_string(),
            }
        }
    }
}

/// Transforms text through one backend.
#[async_trait::async_trait]
pub trait TransformProvider: Send + Sync {
    /// Transform `request`, giving up with `NetworkTimeout` once
    /// `timeout` has elapsed.
    async fn transform(
        &self,
        request: &TransformRequest,
        timeout: Duration,
    ) -> Result<TransformResult, TransformError>;

    fn id(&self) -> &'static str;
}

/// Build the configured provider. A credential is required.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn TransformProvider>, ConfigError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "no API key for provider {}: set provider.api_key or {}",
                config.kind.id(),
                crate::config::API_KEY_ENV
            ))
        })?;

    let base_url = config.base_url.clone();
    let provider: Arc<dyn TransformProvider> = match config.kind {
        ProviderKind::Gemini => Arc::new(gemini::GeminiProvider::new(api_key, base_url)),
        ProviderKind::OpenRouter => {
            Arc::new(openrouter::OpenRouterProvider::new(api_key, base_url))
        }
    };
    Ok(provider)
}

/// Send `request` and decode a JSON body, all within `timeout`.
///
/// Dropping the exchange on timeout aborts the underlying connection.
async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, TransformError> {
    let exchange = async move {
        let response = request.send().await.map_err(TransformError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(TransformError::transport)?;

        if !status.is_success() {
            return Err(TransformError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| TransformError::MalformedResponse(format!("invalid JSON: {e}")))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransformError::NetworkTimeout(timeout))?
}

/// Trim provider output; empty output is malformed.
fn non_empty(text: Option<&str>, what: &str) -> Result<String, TransformError> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransformError::MalformedResponse(format!("no text in {what}")))
}
