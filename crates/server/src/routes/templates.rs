// crates/server/src/routes/templates.rs
//! Global template CRUD.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use lorecard_db::types::GlobalTemplate;

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateTemplateBody {
    id: String,
    name: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTemplateBody {
    name: Option<String>,
    content: Option<String>,
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTemplateBody>,
) -> ApiResult<Json<SingleResponse<GlobalTemplate>>> {
    if body.id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(ApiError::Validation("id and name are required".into()));
    }
    if state.db.get_global_template(&body.id).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "template '{}' already exists",
            body.id
        )));
    }
    let template = state
        .db
        .create_global_template(&body.id, &body.name, &body.content)
        .await?;
    Ok(Json(SingleResponse::new(template)))
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<GlobalTemplate>>> {
    Ok(Json(state.db.list_global_templates().await?))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SingleResponse<GlobalTemplate>>> {
    let template = state
        .db
        .get_global_template(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("GlobalTemplate '{id}'")))?;
    Ok(Json(SingleResponse::new(template)))
}

async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTemplateBody>,
) -> ApiResult<Json<SingleResponse<GlobalTemplate>>> {
    let template = state
        .db
        .update_global_template(&id, body.name.as_deref(), body.content.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("GlobalTemplate '{id}'")))?;
    Ok(Json(SingleResponse::new(template)))
}

async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_global_template(&id).await? {
        return Err(ApiError::NotFound(format!("GlobalTemplate '{id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/global-templates", post(create_template).get(list_templates))
        .route(
            "/global-templates/{id}",
            get(get_template).patch(update_template).delete(delete_template),
        )
}
