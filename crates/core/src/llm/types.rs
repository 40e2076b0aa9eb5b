// crates/core/src/llm/types.rs
//! Request/response/error types shared by every provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::schema;

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One ordered message in a chat request. Text content only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Reasoning-budget parameters, passed through to backends that support them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// A named JSON schema constraining the response shape.
///
/// The schema is normalized on construction ($ref inlining,
/// `additionalProperties: false` on object nodes) so every backend sees the
/// same document regardless of strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema: schema::normalize(schema),
        }
    }
}

/// The backend-agnostic request shape.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature in `[0, 2]`.
    pub temperature: Option<f64>,
    pub reasoning: Option<Reasoning>,
    pub response_format: Option<ResponseSchema>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            reasoning: None,
            response_format: None,
        }
    }
}

/// Token usage and calculated cost for one call.
///
/// `cost` is `-1.0` when the model has no published pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
}

/// A successful completion, carrying everything the audit log needs.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    /// Parsed JSON when a response schema was requested, otherwise a string.
    pub content: Value,
    pub reasoning: Option<String>,
    pub usage: Usage,
    pub raw_request: Value,
    pub raw_response: Value,
    pub latency_ms: i64,
}

/// A failed completion. Still carries the request/response snapshots so the
/// caller can write its audit log.
#[derive(Debug, Clone, Error)]
#[error("provider call failed with status {status_code}")]
pub struct ChatError {
    pub raw_request: Value,
    pub raw_response: Option<Value>,
    pub status_code: u16,
    pub latency_ms: i64,
}

pub type ChatOutcome = Result<ChatResponse, ChatError>;

/// A model advertised by a provider's listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&ChatMessage::new(Role::User, "hi")).unwrap(),
            r#"{"role":"user","content":"hi"}"#
        );
    }

    #[test]
    fn response_schema_normalizes_on_construction() {
        let schema = ResponseSchema::new(
            "entry",
            json!({
                "type": "object",
                "properties": { "title": { "type": "string" } }
            }),
        );
        assert_eq!(schema.schema["additionalProperties"], json!(false));
    }

    #[test]
    fn chat_error_displays_status() {
        let err = ChatError {
            raw_request: json!({}),
            raw_response: None,
            status_code: 422,
            latency_ms: 10,
        };
        assert_eq!(err.to_string(), "provider call failed with status 422");
    }
}
