//! Google Gemini `generateContent` backend.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    TransformError, TransformProvider, TransformRequest, TransformResult, non_empty, send_json,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Keeps 2.x "thinking" models from answering with commentary.
const SYSTEM_INSTRUCTION: &str = "You are a text rephrasing assistant. Respond ONLY with the \
     rephrased text, no thinking, no explanation, no additional commentary. Be direct and concise.";

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

fn request_body(request: &TransformRequest) -> Value {
    let params = request.params();

    let mut generation = json!({
        "temperature": params.temperature,
        "maxOutputTokens": params.max_output_tokens,
        "topK": 40,
    });
    if let Some(top_p) = params.top_p {
        generation["topP"] = json!(top_p);
    }

    let safety: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|c| json!({ "category": c, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
        .collect();

    let mut body = json!({
        "contents": [{ "parts": [{ "text": request.prompt_text() }] }],
        "generationConfig": generation,
        "safetySettings": safety,
    });

    if params.model_id.contains("2.0") || params.model_id.contains("2.5") {
        body["systemInstruction"] = json!({ "parts": [{ "text": SYSTEM_INSTRUCTION }] });
    }

    body
}

fn extract(model: &str, response: GenerateResponse) -> Result<TransformResult, TransformError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| TransformError::MalformedResponse("no candidates in response".into()))?;

    match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION")) => {
            return Err(TransformError::MalformedResponse(format!(
                "response blocked ({reason})"
            )));
        }
        Some("MAX_TOKENS") => tracing::warn!("response truncated at the output token limit"),
        _ => {}
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let text = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .find(|t| !t.trim().is_empty());
    let text = non_empty(text, "candidate")?;

    let mut metadata = BTreeMap::from([
        ("provider".to_string(), "gemini".to_string()),
        ("model".to_string(), model.to_string()),
    ]);
    if let Some(reason) = candidate.finish_reason {
        metadata.insert("finish_reason".into(), reason);
    }
    if let Some(version) = response.model_version {
        metadata.insert("model_version".into(), version);
    }

    Ok(TransformResult {
        text,
        provider_metadata: metadata,
    })
}

#[async_trait::async_trait]
impl TransformProvider for GeminiProvider {
    async fn transform(
        &self,
        request: &TransformRequest,
        timeout: Duration,
    ) -> Result<TransformResult, TransformError> {
        let model = &request.params().model_id;
        tracing::debug!(
            model = %model,
            chars = request.source_text().chars().count(),
            "calling gemini"
        );

        let call = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(request));

        let response: GenerateResponse = send_json(call, timeout).await?;
        extract(model, response)
    }

    fn id(&self) -> &'static str {
        "gemini"
    }
}
