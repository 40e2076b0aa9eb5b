// crates/server/src/routes/mod.rs
//! API route handlers. Thin CRUD over the storage layer; the interesting
//! behavior lives in the pipeline and worker modules.

pub mod analytics;
pub mod cards;
pub mod credentials;
pub mod entries;
pub mod health;
pub mod jobs;
pub mod links;
pub mod logs;
pub mod projects;
pub mod providers;
pub mod sources;
pub mod sse;
pub mod templates;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The combined application router, everything under `/api`.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", projects::router())
        .nest("/api", sources::router())
        .nest("/api", links::router())
        .nest("/api", entries::router())
        .nest("/api", jobs::router())
        .nest("/api", sse::router())
        .nest("/api", templates::router())
        .nest("/api", credentials::router())
        .nest("/api", cards::router())
        .nest("/api", providers::router())
        .nest("/api", logs::router())
        .nest("/api", analytics::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Common `limit`/`offset` query parameters for paginated listings.
#[derive(Debug, serde::Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn app_router_builds() {
        let state = test_state().await;
        let _router = create_app(state);
    }
}
