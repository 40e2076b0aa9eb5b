// crates/core/src/llm/deepseek.rs
//! DeepSeek backend. No native structured-output support, so schema-bound
//! requests go through the prompt-engineered strategy: a formatter message
//! (schema + synthesized example) is appended and the reply is parsed out of
//! a fenced code block.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{malformed_reply, post_json};
use super::provider::Provider;
use super::schema;
use super::types::{ChatError, ChatOutcome, ChatRequest, ChatResponse, ModelInfo, Usage};
use crate::pricing::{deepseek_pricing, PricingTable};
use crate::template;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
// DeepSeek is slow under load; generous ceiling instead of the usual 60s.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct DeepSeekProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    pricing: PricingTable,
    json_formatter: String,
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
}

impl DeepSeekProvider {
    /// `json_formatter` is the formatter prompt template (normally the
    /// `json-formatter-prompt` global template) with `{{schema}}` and
    /// `{{example_response}}` bindings.
    pub fn new(api_key: impl Into<String>, json_formatter: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            pricing: deepseek_pricing(),
            json_formatter: json_formatter.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, payload: &Value) -> Result<(ApiResponse, Value, i64), ChatError> {
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT);

        let reply = post_json(builder, payload).await?;
        match serde_json::from_value::<ApiResponse>(reply.body.clone()) {
            Ok(parsed) => Ok((parsed, reply.body, reply.latency_ms)),
            Err(e) => {
                tracing::error!(error = %e, "unexpected DeepSeek response shape");
                Err(malformed_reply(payload, reply.body, reply.latency_ms))
            }
        }
    }

    fn usage_for(&self, model: &str, usage: &ApiUsage) -> Usage {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost: self
                .pricing
                .cost(model, usage.prompt_tokens, usage.completion_tokens),
        }
    }
}

#[async_trait]
impl Provider for DeepSeekProvider {
    async fn generate(&self, request: ChatRequest) -> ChatOutcome {
        let Some(format) = request.response_format.clone() else {
            // Plain completion.
            let mut payload = json!({ "model": request.model, "messages": request.messages });
            if let Some(t) = request.temperature {
                payload["temperature"] = json!(t);
            }
            let (parsed, raw_response, latency_ms) = self.send(&payload).await?;
            let text = parsed
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default();
            return Ok(ChatResponse {
                id: parsed.id,
                content: Value::String(text),
                reasoning: None,
                usage: self.usage_for(&request.model, &parsed.usage),
                raw_request: payload,
                raw_response,
                latency_ms,
            });
        };

        // Prompt-engineered JSON.
        let schema_text = serde_json::to_string_pretty(&format.schema).unwrap_or_default();
        let example = schema::example_from_schema(&format.schema);
        let formatter_context = json!({
            "schema": schema_text,
            "example_response": example,
        });

        let mut messages = request.messages.clone();
        match template::render_messages(&self.json_formatter, &formatter_context) {
            Ok(extra) => messages.extend(extra),
            Err(e) => {
                tracing::error!(error = %e, "json formatter template failed to render");
                return Err(ChatError {
                    raw_request: json!({ "model": request.model }),
                    raw_response: Some(json!({ "error": e.to_string() })),
                    status_code: 500,
                    latency_ms: 0,
                });
            }
        }

        let mut payload = json!({ "model": request.model, "messages": messages });
        if let Some(t) = request.temperature {
            payload["temperature"] = json!(t);
        }

        let (parsed, raw_response, latency_ms) = self.send(&payload).await?;
        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let content = schema::extract_json_block(&text)
            .and_then(|block| serde_json::from_str::<Value>(&block).ok());

        let Some(content) = content else {
            return Err(ChatError {
                raw_request: payload,
                raw_response: Some(json!({
                    "error": "Failed to get valid JSON.",
                    "final_response_text": text,
                })),
                status_code: 422,
                latency_ms,
            });
        };

        Ok(ChatResponse {
            id: parsed.id,
            content,
            reasoning: None,
            usage: self.usage_for(&request.model, &parsed.usage),
            raw_request: payload,
            raw_response,
            latency_ms,
        })
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "deepseek-chat".into(),
                name: "DeepSeek Chat".into(),
            },
            ModelInfo {
                id: "deepseek-coder".into(),
                name: "DeepSeek Coder".into(),
            },
        ]
    }

    fn name(&self) -> &str {
        "deepseek"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, ResponseSchema, Role};
    use crate::template::JSON_FORMATTER_TEMPLATE;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema_request() -> ChatRequest {
        let mut request =
            ChatRequest::new("deepseek-chat", vec![ChatMessage::new(Role::User, "go")]);
        request.response_format = Some(ResponseSchema::new(
            "r",
            json!({ "type": "object", "properties": { "x": { "type": "string" } } }),
        ));
        request
    }

    fn completion_body(content: &str) -> Value {
        json!({
            "id": "ds-1",
            "choices": [{ "message": { "content": content } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[tokio::test]
    async fn schema_requests_parse_the_fenced_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("```json\n{\"x\": \"parsed\"}\n```")),
            )
            .mount(&server)
            .await;

        let provider =
            DeepSeekProvider::new("k", JSON_FORMATTER_TEMPLATE).with_base_url(server.uri());
        let response = provider.generate(schema_request()).await.unwrap();

        assert_eq!(response.content["x"], "parsed");
        // Formatter message was appended on top of the caller's message.
        let sent = response.raw_request["messages"].as_array().unwrap();
        assert!(sent.len() > 1);
        assert!(sent.last().unwrap()["content"]
            .as_str()
            .unwrap()
            .contains("JSON SCHEMA TO FOLLOW"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_422_with_the_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("I refuse to produce structure")),
            )
            .mount(&server)
            .await;

        let provider =
            DeepSeekProvider::new("k", JSON_FORMATTER_TEMPLATE).with_base_url(server.uri());
        let err = provider.generate(schema_request()).await.unwrap_err();

        assert_eq!(err.status_code, 422);
        assert_eq!(
            err.raw_response.unwrap()["final_response_text"],
            "I refuse to produce structure"
        );
    }

    #[tokio::test]
    async fn plain_completions_skip_the_formatter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
            .mount(&server)
            .await;

        let provider =
            DeepSeekProvider::new("k", JSON_FORMATTER_TEMPLATE).with_base_url(server.uri());
        let request = ChatRequest::new("deepseek-chat", vec![ChatMessage::new(Role::User, "hi")]);
        let response = provider.generate(request).await.unwrap();

        assert_eq!(response.content, Value::String("hello".into()));
        assert_eq!(response.raw_request["messages"].as_array().unwrap().len(), 1);
        assert!((response.usage.cost - (10.0 * 0.14 + 5.0 * 0.28) / 1_000_000.0).abs() < 1e-12);
    }
}
