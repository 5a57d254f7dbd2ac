//! Client for any OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ConfabError, Result};
use crate::types::{ChatMessage, Role, ToolCallRequest, Usage};
use crate::util::with_timeout;

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{ChatRequest, ChatResponse, ModelClient};

pub struct OpenAiCompatibleClient {
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn build_request_body(request: &ChatRequest) -> Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_wire)
            .collect::<Vec<_>>();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            let obj = body.as_object_mut().unwrap();
            obj.insert("tools".into(), Value::Array(request.tools.clone()));
            obj.insert("tool_choice".into(), json!("auto"));
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = Self::build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, messages = request.messages.len(), "chat request");

        let resp = with_timeout(self.request_timeout, async {
            shared_client()
                .post(&url)
                .headers(bearer_headers(self.api_key.as_deref()))
                .json(&body)
                .send()
                .await
                .map_err(ConfabError::Network)
        })
        .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: Value = resp.json().await?;
        parse_chat_response(&data)
    }
}

/// Flatten a message into the chat-completions wire shape. Tool call
/// arguments go out re-serialized as a JSON string, as the API requires.
fn message_to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    let obj = wire.as_object_mut().unwrap();
    if let Some(calls) = &message.tool_calls {
        let calls: Vec<Value> = calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj.insert("tool_calls".into(), calls.into());
    }
    if message.role == Role::Tool {
        obj.insert("tool_call_id".into(), json!(message.tool_call_id));
    }
    wire
}

/// Parse a completion payload, tolerating known gateway quirks: an envelope
/// that wraps the payload under `"response"`, usage reported under either
/// `prompt_tokens`/`completion_tokens` or `input_tokens`/`output_tokens`,
/// and an optional root-level `cost`.
fn parse_chat_response(data: &Value) -> Result<ChatResponse> {
    let payload = unwrap_envelope(data);

    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| ConfabError::api(200, "no choices in completion response"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: parse_usage(payload),
    })
}

fn unwrap_envelope(data: &Value) -> &Value {
    match data.get("response") {
        Some(inner) if inner.is_object() => inner,
        _ => data,
    }
}

fn parse_tool_call(call: &Value) -> Option<ToolCallRequest> {
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?.to_owned();
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    let arguments = match function.get("arguments") {
        // Argument JSON that fails to parse is kept verbatim so the loop can
        // reject this one call instead of the whole response.
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .unwrap_or_else(|_| Value::String(raw.clone())),
        Some(other) => other.clone(),
        None => json!({}),
    };
    Some(ToolCallRequest { id, name, arguments })
}

fn parse_usage(payload: &Value) -> Usage {
    let usage = payload.get("usage").cloned().unwrap_or(Value::Null);
    let field = |a: &str, b: &str| {
        usage
            .get(a)
            .and_then(Value::as_u64)
            .or_else(|| usage.get(b).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    Usage {
        input_tokens: field("prompt_tokens", "input_tokens"),
        output_tokens: field("completion_tokens", "output_tokens"),
        cached_input_tokens: usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64),
        cost: payload
            .get("cost")
            .or_else(|| usage.get("cost"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    }
}
