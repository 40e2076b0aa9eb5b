// crates/server/src/routes/projects.rs
//! Project CRUD.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use lorecard_db::types::{CreateProject, Project, UpdateProject};
use lorecard_db::Paginated;

use super::Pagination;
use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProject>,
) -> ApiResult<Json<SingleResponse<Project>>> {
    if body.id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(ApiError::Validation("id and name are required".into()));
    }
    if body.requests_per_minute <= 0 {
        return Err(ApiError::Validation(
            "requests_per_minute must be positive".into(),
        ));
    }
    let project = state.db.create_project(&body).await?;
    Ok(Json(SingleResponse::new(project)))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Paginated<Project>>> {
    Ok(Json(state.db.list_projects(page.limit, page.offset).await?))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SingleResponse<Project>>> {
    let project = state
        .db
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(SingleResponse::new(project)))
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProject>,
) -> ApiResult<Json<SingleResponse<Project>>> {
    let project = state
        .db
        .update_project(&project_id, &body)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{project_id}'")))?;
    Ok(Json(SingleResponse::new(project)))
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_project(&project_id).await? {
        return Err(ApiError::NotFound(format!("Project '{project_id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route(
            "/projects/{project_id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
}
