// crates/core/src/llm/http.rs
//! Shared request plumbing for the HTTP-backed providers.

use std::time::Instant;

use serde_json::{json, Value};

use super::types::ChatError;

pub(crate) struct HttpReply {
    pub body: Value,
    pub latency_ms: i64,
}

/// Send a JSON POST and classify the result.
///
/// Transport failures map to status 500; non-2xx responses surface the
/// response body. Both arms preserve latency and the request snapshot so the
/// caller can build its audit log.
pub(crate) async fn post_json(
    builder: reqwest::RequestBuilder,
    raw_request: &Value,
) -> Result<HttpReply, ChatError> {
    let started = Instant::now();

    let response = match builder.json(raw_request).send().await {
        Ok(response) => response,
        Err(e) => {
            return Err(ChatError {
                raw_request: raw_request.clone(),
                raw_response: Some(json!({ "error": e.to_string() })),
                status_code: 500,
                latency_ms: started.elapsed().as_millis() as i64,
            })
        }
    };

    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    let latency_ms = started.elapsed().as_millis() as i64;

    if !status.is_success() {
        tracing::error!(status = status.as_u16(), "provider returned error status");
        return Err(ChatError {
            raw_request: raw_request.clone(),
            raw_response: Some(body),
            status_code: status.as_u16(),
            latency_ms,
        });
    }

    Ok(HttpReply { body, latency_ms })
}

/// Parse-stage failure on an otherwise delivered response.
pub(crate) fn malformed_reply(
    raw_request: &Value,
    raw_response: Value,
    latency_ms: i64,
) -> ChatError {
    ChatError {
        raw_request: raw_request.clone(),
        raw_response: Some(raw_response),
        status_code: 502,
        latency_ms,
    }
}
