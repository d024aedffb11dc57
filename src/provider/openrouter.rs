//! OpenRouter backend (OpenAI-compatible chat completions).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    TransformError, TransformProvider, TransformRequest, TransformResult, non_empty, send_json,
};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn request_body(request: &TransformRequest) -> Value {
    let params = request.params();
    let mut body = json!({
        "model": params.model_id,
        "messages": [{ "role": "user", "content": request.prompt_text() }],
        "temperature": params.temperature,
        "max_tokens": params.max_output_tokens,
    });
    if let Some(top_p) = params.top_p {
        body["top_p"] = json!(top_p);
    }
    body
}

fn extract(model: &str, response: ChatResponse) -> Result<TransformResult, TransformError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransformError::MalformedResponse("no choices in response".into()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        tracing::warn!("response truncated at the output token limit");
    }

    let content = choice.message.and_then(|m| m.content);
    let text = non_empty(content.as_deref(), "choice")?;

    let mut metadata = BTreeMap::from([
        ("provider".to_string(), "openrouter".to_string()),
        ("model".to_string(), model.to_string()),
    ]);
    if let Some(reason) = choice.finish_reason {
        metadata.insert("finish_reason".into(), reason);
    }
    if let Some(served_by) = response.model {
        metadata.insert("model_version".into(), served_by);
    }

    Ok(TransformResult {
        text,
        provider_metadata: metadata,
    })
}

#[async_trait::async_trait]
impl TransformProvider for OpenRouterProvider {
    async fn transform(
        &self,
        request: &TransformRequest,
        timeout: Duration,
    ) -> Result<TransformResult, TransformError> {
        let model = &request.params().model_id;
        tracing::debug!(
            model = %model,
            chars = request.source_text().chars().count(),
            "calling openrouter"
        );

        let call = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "Chisel")
            .json(&request_body(request));

        let response: ChatResponse = send_json(call, timeout).await?;
        extract(model, response)
    }

    fn id(&self) -> &'static str {
        "openrouter"
    }
}
