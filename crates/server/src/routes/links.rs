// crates/server/src/routes/links.rs
//! Link listing and curation. Links are created by `confirm_links` jobs,
//! never directly through this surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use uuid::Uuid;

use lorecard_db::types::Link;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

async fn list_links(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Link>>> {
    state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(state.db.list_links_for_project(&project_id).await?))
}

async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_link(link_id).await? {
        return Err(ApiError::NotFound(format!("Link '{link_id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/{project_id}/links", get(list_links))
        .route("/links/{link_id}", delete(delete_link))
}
