// crates/core/src/llm/gemini.rs
//! Google Gemini backend. Native JSON mode via `responseMimeType` plus a
//! schema instruction folded into the system prompt.
//!
//! The generateContent API wants strictly alternating user/model turns that
//! start with a user message, so consecutive same-role messages are merged
//! and a seed user turn is inserted when needed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::http::{malformed_reply, post_json};
use super::provider::Provider;
use super::types::{ChatOutcome, ChatRequest, ChatResponse, ModelInfo, Role, Usage};
use crate::pricing::{gemini_pricing, PricingTable};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    pricing: PricingTable,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            pricing: gemini_pricing(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<(String, Vec<String>)> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                role => {
                    let gemini_role = if role == Role::Assistant { "model" } else { "user" };
                    match contents.last_mut() {
                        // Merge consecutive same-role turns.
                        Some((last_role, parts)) if last_role == gemini_role => {
                            parts.push(message.content.clone())
                        }
                        _ => contents.push((gemini_role.to_string(), vec![message.content.clone()])),
                    }
                }
            }
        }

        let mut generation_config = Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = request.reasoning.as_ref().and_then(|r| r.max_tokens) {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(format) = &request.response_format {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
            let schema_text = serde_json::to_string(&format.schema).unwrap_or_default();
            system_parts.insert(
                0,
                format!(
                    "You must respond with a valid JSON object that strictly adheres to the \
                     following JSON schema. Do not include any other text or explanations \
                     before or after the JSON. JSON Schema: {schema_text}"
                ),
            );
        }

        if contents.is_empty() || contents[0].0 != "user" {
            contents.insert(0, ("user".into(), vec!["Start of conversation.".into()]));
        }

        let contents_json: Vec<Value> = contents
            .into_iter()
            .map(|(role, parts)| {
                json!({
                    "role": role,
                    "parts": parts.into_iter().map(|t| json!({ "text": t })).collect::<Vec<_>>(),
                })
            })
            .collect();

        let mut payload = json!({
            "contents": contents_json,
            "generationConfig": Value::Object(generation_config),
        });
        if !system_parts.is_empty() {
            payload["systemInstruction"] = json!({
                "parts": [{ "text": system_parts.join("\n\n") }]
            });
        }
        payload
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn generate(&self, request: ChatRequest) -> ChatOutcome {
        let payload = self.build_payload(&request);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let builder = self.client.post(url).timeout(REQUEST_TIMEOUT);

        let reply = post_json(builder, &payload).await?;

        let text: String = match reply.body["candidates"]
            .get(0)
            .and_then(|c| c["content"]["parts"].as_array())
        {
            Some(parts) => parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join(""),
            None => {
                tracing::error!("Gemini response carried no candidates");
                return Err(malformed_reply(&payload, reply.body, reply.latency_ms));
            }
        };

        let usage_meta = &reply.body["usageMetadata"];
        let prompt_tokens = usage_meta["promptTokenCount"].as_i64().unwrap_or(0);
        let completion_tokens = usage_meta["candidatesTokenCount"].as_i64().unwrap_or(0);
        let total_tokens = usage_meta["totalTokenCount"]
            .as_i64()
            .unwrap_or(prompt_tokens + completion_tokens);

        let content = if request.response_format.is_some() {
            serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(ChatResponse {
            id: format!("gemini-{}", uuid_like(&reply.body)),
            content,
            reasoning: None,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
                cost: self
                    .pricing
                    .cost(&request.model, prompt_tokens, completion_tokens),
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
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        let body: Value = match response {
            Ok(r) if r.status().is_success() => r.json().await.unwrap_or(Value::Null),
            Ok(r) => {
                tracing::error!(status = r.status().as_u16(), "failed to list Gemini models");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to list Gemini models");
                return Vec::new();
            }
        };

        let mut models: Vec<ModelInfo> = body["models"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|m| {
                        m["supportedGenerationMethods"]
                            .as_array()
                            .is_some_and(|ms| ms.iter().any(|v| v == "generateContent"))
                    })
                    .filter_map(|m| {
                        let id = m["name"].as_str()?.trim_start_matches("models/").to_string();
                        let name = m["displayName"].as_str().unwrap_or(&id).to_string();
                        Some(ModelInfo { id, name })
                    })
                    .collect()
            })
            .unwrap_or_default();

        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Gemini responses carry no stable id; derive a short fingerprint for logs.
fn uuid_like(body: &Value) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body.to_string().as_bytes());
    format!("{:08x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, ResponseSchema};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn payload_merges_roles_and_seeds_user_turn() {
        let provider = GeminiProvider::new("k");
        let request = ChatRequest::new(
            "gemini-2.5-flash",
            vec![
                ChatMessage::new(Role::System, "be terse"),
                ChatMessage::new(Role::Assistant, "previous answer"),
                ChatMessage::new(Role::Assistant, "more of it"),
                ChatMessage::new(Role::User, "question"),
            ],
        );
        let payload = provider.build_payload(&request);

        let contents = payload["contents"].as_array().unwrap();
        // Seed user turn, merged model turn, user turn.
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn payload_requests_json_mime_for_schemas() {
        let provider = GeminiProvider::new("k");
        let mut request =
            ChatRequest::new("gemini-2.5-flash", vec![ChatMessage::new(Role::User, "go")]);
        request.response_format = Some(ResponseSchema::new(
            "r",
            json!({ "type": "object", "properties": { "x": { "type": "string" } } }),
        ));
        let payload = provider.build_payload(&request);

        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let instruction = payload["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(instruction.contains("JSON Schema"));
        assert!(instruction.contains("additionalProperties"));
    }

    #[tokio::test]
    async fn generate_prices_with_the_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"/models/gemini-2\.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "{\"x\": \"y\"}" }], "role": "model" } }],
                "usageMetadata": { "promptTokenCount": 1_000_000, "candidatesTokenCount": 0, "totalTokenCount": 1_000_000 }
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("k").with_base_url(server.uri());
        let mut request =
            ChatRequest::new("gemini-2.5-flash", vec![ChatMessage::new(Role::User, "go")]);
        request.response_format = Some(ResponseSchema::new(
            "r",
            json!({ "type": "object", "properties": { "x": { "type": "string" } } }),
        ));

        let response = provider.generate(request).await.unwrap();
        assert_eq!(response.content["x"], "y");
        assert!((response.usage.cost - 0.30).abs() < 1e-9);
    }
}
