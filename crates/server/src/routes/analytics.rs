// crates/server/src/routes/analytics.rs
//! Per-project cost and usage aggregates.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use lorecard_db::ProjectAnalytics;

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

async fn project_analytics(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SingleResponse<ProjectAnalytics>>> {
    state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    let analytics = state.db.get_project_analytics(&project_id).await?;
    Ok(Json(SingleResponse::new(analytics)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/analytics/projects/{project_id}", get(project_analytics))
}
