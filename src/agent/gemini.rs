//! Gemini reasoning backend on Vertex AI.
//!
//! Each step is one `generateContent` call:
//!
//! ```text
//! POST {base}/v1/projects/{p}/locations/{region}/publishers/google/models/{model}:generateContent
//! ```
//!
//! The session history maps onto `contents`: user text and tool results
//! are sent with role `user`, model text and tool calls with role
//! `model`. Tool declarations go in `tools[0].functionDeclarations`.
//!
//! HTTP 429 and 5xx (and transport failures) become
//! [`ModelError::Unavailable`] and are retried by the agent; any other
//! non-success status is [`ModelError::Rejected`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{Message, ModelRequest, ModelStep, ReasoningModel};
use crate::auth::TokenSource;
use crate::config::Config;
use crate::error::ModelError;

pub struct GeminiModel {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    url: String,
}

impl GeminiModel {
    pub fn new(config: &Config, tokens: Arc<TokenSource>) -> anyhow::Result<Self> {
        let agent = &config.agent;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(agent.timeout_secs))
            .user_agent(config.gcp.app_name.clone())
            .build()?;
        let base = agent
            .endpoint
            .clone()
            .unwrap_or_else(|| aiplatform_host(&agent.region));
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base, config.gcp.project_id, agent.region, agent.model
        );
        Ok(Self {
            client,
            tokens,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Default Vertex AI host for a region.
pub fn aiplatform_host(region: &str) -> String {
    if region == "global" {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com", region)
    }
}

/// Build the `generateContent` request body.
pub fn request_body(request: &ModelRequest<'_>) -> Value {
    let contents: Vec<Value> = request.history.iter().map(content_for).collect();
    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
    });
    if !request.tools.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": request.tools }]);
    }
    body
}

fn content_for(message: &Message) -> Value {
    match message {
        Message::User(text) => json!({ "role": "user", "parts": [{ "text": text }] }),
        Message::Model(text) => json!({ "role": "model", "parts": [{ "text": text }] }),
        Message::ToolCall { name, arguments } => json!({
            "role": "model",
            "parts": [{ "functionCall": { "name": name, "args": arguments } }],
        }),
        Message::ToolResult { name, response } => json!({
            "role": "user",
            "parts": [{ "functionResponse": { "name": name, "response": response } }],
        }),
    }
}

/// Interpret a `generateContent` response.
///
/// A function call anywhere in the first candidate wins over text.
pub fn parse_response(json: &Value) -> Result<ModelStep, ModelError> {
    let candidate = match json
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        Some(c) => c,
        None => {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            return Err(ModelError::Rejected(format!("prompt blocked: {}", reason)));
        }
    };

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if let Some(call) = parts.iter().find_map(|p| p.get("functionCall")) {
        let name = call
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::Malformed("functionCall without name".into()))?;
        let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
        return Ok(ModelStep::ToolRequest {
            name: name.to_string(),
            arguments,
        });
    }

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        return Err(ModelError::Malformed(format!(
            "empty response (finishReason {})",
            finish
        )));
    }
    Ok(ModelStep::FinalAnswer(text.trim().to_string()))
}

#[async_trait]
impl ReasoningModel for GeminiModel {
    async fn step(&self, request: ModelRequest<'_>) -> Result<ModelStep, ModelError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| ModelError::Rejected(format!("auth: {:#}", e)))?;

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&request_body(&request))
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("generateContent request: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("generateContent error {}: {}", status, body);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                ModelError::Unavailable(message)
            } else {
                ModelError::Rejected(message)
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("invalid JSON: {}", e)))?;
        let step = parse_response(&json)?;
        if let ModelStep::ToolRequest { name, .. } = &step {
            tracing::debug!(tool = %name, "model requested tool");
        }
        Ok(step)
    }
}
