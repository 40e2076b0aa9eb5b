// crates/server/src/routes/sse.rs
//! The SSE subscription endpoint: `open` on connect, project events as they
//! arrive, `ping` after 15 quiet seconds. Subscribers unregister themselves
//! when the stream is dropped.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

const KEEP_ALIVE_AFTER: Duration = Duration::from_secs(15);

async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.events.subscribe(&project_id);
    tracing::debug!(project_id, "SSE client subscribed");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("open").data("connection established"));

        loop {
            match tokio::time::timeout(KEEP_ALIVE_AFTER, subscription.receiver.recv()).await {
                Ok(Some(event)) => {
                    let data = serde_json::to_string(&event.data).unwrap_or_default();
                    yield Ok(Event::default().event(event.event).data(data));
                }
                // Broadcaster side dropped this subscriber; end the stream.
                Ok(None) => break,
                Err(_) => {
                    yield Ok(Event::default().event("ping").data("keep-alive"));
                }
            }
        }
    };

    Sse::new(stream)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sse/subscribe/{project_id}", get(subscribe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn stream_has_event_stream_content_type_and_open_event() {
        let state = test_state().await;
        let app = Router::new()
            .route("/sse/subscribe/{project_id}", get(subscribe))
            .with_state(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sse/subscribe/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(
            content_type.contains("text/event-stream"),
            "expected text/event-stream, got {content_type}"
        );

        // Publish one event, then read the prefix of the body.
        state.events.publish("p1", "job_status_update", serde_json::json!({ "x": 1 }));
        let bytes = tokio::time::timeout(
            Duration::from_secs(2),
            read_prefix(response.into_body(), 2),
        )
        .await
        .expect("body prefix in time");
        let text = String::from_utf8_lossy(&bytes).to_string();
        assert!(text.contains("event: open"));
        assert!(text.contains("event: job_status_update"));
        assert!(text.contains("\"project_id\":\"p1\""));
    }

    async fn read_prefix(body: Body, frames: usize) -> Vec<u8> {
        use http_body_util::BodyExt;
        let mut collected = Vec::new();
        let mut body = body;
        for _ in 0..frames {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        collected.extend_from_slice(data);
                    }
                }
                _ => break,
            }
        }
        collected
    }
}
