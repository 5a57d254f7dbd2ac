//! Conversation message types.
//!
//! Messages use the flat chat-completions shape: a role, optional text
//! content, optional tool calls (assistant only) and an optional
//! `tool_call_id` (tool role only). This is both the wire format sent to the
//! model API and the persisted session format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed arguments. When the model emits un-parseable argument JSON the
    /// raw text is kept as a string value so the loop can reject the call
    /// without losing the other calls in the batch.
    pub arguments: serde_json::Value,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Create an assistant message carrying tool calls. Content may be empty
    /// when the model emitted calls only.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a tool result message answering one emitted call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            timestamp: Some(Utc::now()),
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Text content, or empty string when absent.
    pub fn text_content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Emitted tool calls, empty when none.
    pub fn emitted_calls(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

/// Coerce model-emitted tool-call arguments into a JSON object.
///
/// Accepts an object, null (treated as empty object) or a stringified
/// object; anything else is rejected as malformed.
pub fn coerce_arguments(value: &serde_json::Value) -> crate::error::Result<serde_json::Value> {
    match value {
        serde_json::Value::Null => Ok(serde_json::json!({})),
        serde_json::Value::Object(_) => Ok(value.clone()),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(serde_json::json!({}));
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                crate::error::ConfabError::InvalidArgument(format!(
                    "tool arguments must be valid JSON: {e}"
                ))
            })?;
            coerce_arguments(&parsed)
        }
        other => Err(crate::error::ConfabError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_carries_call_id() {
        let message = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.text_content(), "ok");
    }

    #[test]
    fn assistant_tool_calls_allows_null_content() {
        let message = ChatMessage::assistant_tool_calls(
            None,
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search".into(),
                arguments: json!({"q": "rust"}),
            }],
        );
        assert!(message.content.is_none());
        assert_eq!(message.emitted_calls().len(), 1);

        let wire = serde_json::to_value(&message).expect("message should serialize");
        assert!(wire.get("content").is_none());
    }

    #[test]
    fn coerce_arguments_accepts_object_null_and_stringified_object() {
        assert_eq!(
            coerce_arguments(&json!({"a": 1})).expect("object passes"),
            json!({"a": 1})
        );
        assert_eq!(
            coerce_arguments(&serde_json::Value::Null).expect("null becomes empty object"),
            json!({})
        );
        assert_eq!(
            coerce_arguments(&json!(r#"{"a":1}"#)).expect("stringified object parses"),
            json!({"a": 1})
        );
    }

    #[test]
    fn coerce_arguments_rejects_non_object() {
        assert!(coerce_arguments(&json!([1, 2])).is_err());
        assert!(coerce_arguments(&json!(r#"{"a":"#)).is_err());
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), json!("assistant"));
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}
