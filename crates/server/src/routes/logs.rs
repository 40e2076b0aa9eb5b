// crates/server/src/routes/logs.rs
//! Read-only listing of the LLM audit log.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use lorecard_db::types::ApiRequestLog;
use lorecard_db::Paginated;

use super::Pagination;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

async fn list_logs(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Paginated<ApiRequestLog>>> {
    state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(
        state
            .db
            .list_api_request_logs(&project_id, page.limit, page.offset)
            .await?,
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/projects/{project_id}/requests", get(list_logs))
}
