// crates/server/src/routes/sources.rs
//! Source CRUD plus the crawl hierarchy and content-version history.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use lorecard_db::types::{
    CreateProjectSource, ProjectSource, SourceContentVersion, SourceHierarchyEdge,
    UpdateProjectSource,
};

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

async fn create_source(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProjectSource>,
) -> ApiResult<Json<SingleResponse<ProjectSource>>> {
    state
        .db
        .get_project(&body.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{}'", body.project_id)))?;
    if body.url.trim().is_empty() {
        return Err(ApiError::Validation("url is required".into()));
    }

    if state
        .db
        .get_source_by_url(&body.project_id, &body.url)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "source with url '{}' already exists for this project",
            body.url
        )));
    }

    let source = state.db.create_project_source(&body).await?;
    Ok(Json(SingleResponse::new(source)))
}

async fn list_sources(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<ProjectSource>>> {
    state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(state.db.list_sources_for_project(&project_id).await?))
}

async fn get_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<Uuid>,
) -> ApiResult<Json<SingleResponse<ProjectSource>>> {
    let source = state
        .db
        .get_project_source(source_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source '{source_id}'")))?;
    Ok(Json(SingleResponse::new(source)))
}

async fn update_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<Uuid>,
    Json(body): Json<UpdateProjectSource>,
) -> ApiResult<Json<SingleResponse<ProjectSource>>> {
    let source = state
        .db
        .update_project_source(source_id, &body)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source '{source_id}'")))?;
    Ok(Json(SingleResponse::new(source)))
}

async fn delete_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_project_source(source_id).await? {
        return Err(ApiError::NotFound(format!("Source '{source_id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn list_hierarchy(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<SourceHierarchyEdge>>> {
    Ok(Json(state.db.list_source_hierarchy(&project_id).await?))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SourceContentVersion>>> {
    state
        .db
        .get_project_source(source_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source '{source_id}'")))?;
    Ok(Json(state.db.list_source_content_versions(source_id).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sources", post(create_source))
        .route(
            "/sources/{source_id}",
            get(get_source).patch(update_source).delete(delete_source),
        )
        .route("/sources/{source_id}/versions", get(list_versions))
        .route("/projects/{project_id}/sources", get(list_sources))
        .route("/projects/{project_id}/source-hierarchy", get(list_hierarchy))
}
