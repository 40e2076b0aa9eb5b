// crates/server/src/routes/entries.rs
//! Lorebook entry CRUD.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use lorecard_db::types::{LorebookEntry, UpdateLorebookEntry};

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<LorebookEntry>>> {
    state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(state.db.list_entries_for_project(&project_id).await?))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<Json<SingleResponse<LorebookEntry>>> {
    let entry = state
        .db
        .get_lorebook_entry(entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("LorebookEntry '{entry_id}'")))?;
    Ok(Json(SingleResponse::new(entry)))
}

async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<UpdateLorebookEntry>,
) -> ApiResult<Json<SingleResponse<LorebookEntry>>> {
    let entry = state
        .db
        .update_lorebook_entry(entry_id, &body)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("LorebookEntry '{entry_id}'")))?;
    Ok(Json(SingleResponse::new(entry)))
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_lorebook_entry(entry_id).await? {
        return Err(ApiError::NotFound(format!("LorebookEntry '{entry_id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/{project_id}/entries", get(list_entries))
        .route(
            "/entries/{entry_id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
}
