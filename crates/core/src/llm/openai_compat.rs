// crates/core/src/llm/openai_compat.rs
//! Generic OpenAI-compatible backend with a user-supplied base URL
//! (self-hosted gateways, vLLM, LM Studio, …). Native JSON mode via
//! `json_schema`; cost is unknowable for arbitrary endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{malformed_reply, post_json};
use super::provider::Provider;
use super::types::{ChatOutcome, ChatRequest, ChatResponse, ModelInfo, Usage};
use crate::pricing::UNKNOWN_COST;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct OpenAiCompatProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(format) = &request.response_format {
            // Strict mode on these endpoints rejects schemas with optional
            // fields; force every property into `required`.
            let mut schema = format.schema.clone();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                let keys: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
                schema["required"] = Value::Array(keys);
            }
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": format.name, "strict": true, "schema": schema }
            });
        }
        payload
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    async fn generate(&self, request: ChatRequest) -> ChatOutcome {
        let payload = self.build_payload(&request);
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT);

        let reply = post_json(builder, &payload).await?;

        let parsed: ApiResponse = match serde_json::from_value(reply.body.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(error = %e, "unexpected response shape from OpenAI-compatible endpoint");
                return Err(malformed_reply(&payload, reply.body, reply.latency_ms));
            }
        };

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let content = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let usage = parsed.usage.unwrap_or_default();

        Ok(ChatResponse {
            id: parsed.id,
            content,
            reasoning: None,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                cost: UNKNOWN_COST,
            },
            raw_request: payload,
            raw_response: reply.body,
            latency_ms: reply.latency_ms,
        })
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        let body: Value = match response {
            Ok(r) if r.status().is_success() => r.json().await.unwrap_or(Value::Null),
            _ => return Vec::new(),
        };

        body["data"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|m| {
                        let id = m["id"].as_str()?.to_string();
                        Some(ModelInfo {
                            name: id.clone(),
                            id,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn name(&self) -> &str {
        "openai_compatible"
    }
}
