// crates/core/src/llm/openrouter.rs
//! OpenRouter backend. Native JSON mode via the `json_schema` response
//! format; cost comes back from the API itself (`usage.include`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{malformed_reply, post_json};
use super::provider::Provider;
use super::types::{ChatOutcome, ChatRequest, ChatResponse, ModelInfo, Usage};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct OpenRouterProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    #[serde(default)]
    cost: f64,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (tests point this at a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
            "usage": { "include": true },
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(reasoning) = &request.reasoning {
            payload["reasoning"] = json!(reasoning);
        }
        if let Some(format) = &request.response_format {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "strict": true,
                    "schema": format.schema,
                }
            });
        }
        payload
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
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
                tracing::error!(error = %e, "unexpected OpenRouter response shape");
                return Err(malformed_reply(&payload, reply.body, reply.latency_ms));
            }
        };

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        // Structured responses come back as a JSON string; plain completions stay text.
        let content = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(ChatResponse {
            id: parsed.id,
            content,
            reasoning: None,
            usage: Usage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
                cost: parsed.usage.cost,
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
            Ok(r) => {
                tracing::error!(status = r.status().as_u16(), "failed to list OpenRouter models");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to list OpenRouter models");
                return Vec::new();
            }
        };

        let mut models: Vec<ModelInfo> = body["data"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|m| {
                        let arch = &m["architecture"];
                        let has = |key: &str| {
                            arch[key]
                                .as_array()
                                .is_some_and(|ms| ms.iter().any(|v| v == "text"))
                        };
                        has("input_modalities") && has("output_modalities")
                    })
                    .filter_map(|m| {
                        Some(ModelInfo {
                            id: m["id"].as_str()?.to_string(),
                            name: m["name"].as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, ResponseSchema, Role};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_with_schema() -> ChatRequest {
        let mut request = ChatRequest::new(
            "google/gemini-2.5-flash",
            vec![ChatMessage::new(Role::User, "summarize")],
        );
        request.response_format = Some(ResponseSchema::new(
            "entry",
            serde_json::json!({
                "type": "object",
                "properties": { "title": { "type": "string" } }
            }),
        ));
        request
    }

    #[tokio::test]
    async fn generate_parses_structured_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "response_format": { "type": "json_schema" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-1",
                "choices": [{ "message": { "content": "{\"title\": \"Whiterun\"}" } }],
                "usage": { "prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120, "cost": 0.0004 }
            })))
            .mount(&server)
            .await;

        let provider = OpenRouterProvider::new("test-key").with_base_url(server.uri());
        let response = provider.generate(request_with_schema()).await.unwrap();

        assert_eq!(response.content["title"], "Whiterun");
        assert_eq!(response.usage.total_tokens, 120);
        assert!(response.latency_ms >= 0);
    }

    #[tokio::test]
    async fn generate_surfaces_http_errors_with_snapshots() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({ "error": "rate limited" })),
            )
            .mount(&server)
            .await;

        let provider = OpenRouterProvider::new("test-key").with_base_url(server.uri());
        let err = provider.generate(request_with_schema()).await.unwrap_err();

        assert_eq!(err.status_code, 429);
        assert_eq!(err.raw_request["model"], "google/gemini-2.5-flash");
        assert_eq!(err.raw_response.unwrap()["error"], "rate limited");
    }

    #[tokio::test]
    async fn list_models_filters_text_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "id": "a/text-model",
                        "name": "Zeta",
                        "architecture": { "input_modalities": ["text"], "output_modalities": ["text"] }
                    },
                    {
                        "id": "b/image-model",
                        "name": "Imager",
                        "architecture": { "input_modalities": ["image"], "output_modalities": ["image"] }
                    },
                    {
                        "id": "c/other",
                        "name": "Alpha",
                        "architecture": { "input_modalities": ["text"], "output_modalities": ["text"] }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let provider = OpenRouterProvider::new("test-key").with_base_url(server.uri());
        let models = provider.list_models().await;

        assert_eq!(models.len(), 2);
        // Sorted by display name.
        assert_eq!(models[0].name, "Alpha");
        assert_eq!(models[1].name, "Zeta");
    }
}
