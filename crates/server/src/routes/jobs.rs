// crates/server/src/routes/jobs.rs
//! Job enqueue, inspection, and the cancellation endpoint.
//!
//! `POST /jobs/{kind}` takes the task kind in the path and a JSON body
//! carrying `project_id` plus the kind's payload fields. Prerequisite
//! violations (rescan without selectors, AI edit without a model) are
//! rejected here so the queue only ever holds runnable work.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use lorecard_db::types::{
    BackgroundJob, JobPayload, JobStatus, Project, TaskKind, UpdateBackgroundJob,
};
use lorecard_db::Paginated;

use super::Pagination;
use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::pipeline;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    project_id: String,
    #[serde(flatten)]
    payload: Value,
}

async fn enqueue_job(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> ApiResult<Json<SingleResponse<BackgroundJob>>> {
    // Route segments are kebab-case; task kinds are snake_case.
    let kind = TaskKind::parse(&kind.replace('-', "_"))
        .map_err(|_| ApiError::Validation(format!("unknown task kind '{kind}'")))?;

    let project = state
        .db
        .get_project(&body.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project '{}'", body.project_id)))?;

    let payload_json = serde_json::to_string(&body.payload)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let payload = JobPayload::from_json(kind, Some(&payload_json))
        .map_err(|e| ApiError::Validation(format!("invalid payload for {kind}: {e}")))?;

    check_prerequisites(&state, kind, &project, &payload).await?;

    let job = state.db.create_background_job(&project.id, &payload).await?;
    tracing::info!(job_id = %job.id, task_kind = %kind, project_id = %project.id, "job enqueued");
    Ok(Json(SingleResponse::new(job)))
}

/// Reject jobs that cannot possibly run.
async fn check_prerequisites(
    state: &AppState,
    kind: TaskKind,
    project: &Project,
    payload: &JobPayload,
) -> ApiResult<()> {
    match (kind, payload) {
        (TaskKind::GenerateSearchParams, _) => {
            if project.prompt.as_deref().unwrap_or("").trim().is_empty() {
                return Err(ApiError::Conflict("project has no prompt".into()));
            }
        }
        (TaskKind::DiscoverAndCrawlSources, JobPayload::DiscoverAndCrawlSources(p)) => {
            if project.search_params.is_none() {
                return Err(ApiError::Conflict(
                    "project has no search params; generate them first".into(),
                ));
            }
            if p.source_ids.is_empty() {
                return Err(ApiError::Validation("source_ids must not be empty".into()));
            }
        }
        (TaskKind::RescanLinks, JobPayload::RescanLinks(p)) => {
            let mut any_selectors = false;
            for source_id in &p.source_ids {
                if let Some(source) = state.db.get_project_source(*source_id).await? {
                    if source
                        .content_selectors
                        .as_ref()
                        .is_some_and(|s| !s.is_empty())
                    {
                        any_selectors = true;
                        break;
                    }
                }
            }
            if !any_selectors {
                return Err(ApiError::Conflict(
                    "no source has selectors to rescan with; run discovery first".into(),
                ));
            }
        }
        (TaskKind::AiEditSourceContent, JobPayload::AiEditSourceContent(p)) => {
            if project.model_name.trim().is_empty() || project.credential_id.is_none() {
                return Err(ApiError::Conflict(
                    "project has no model or credential configured for AI edits".into(),
                ));
            }
            if p.edit_instruction.trim().is_empty() {
                return Err(ApiError::Validation("edit_instruction is required".into()));
            }
        }
        _ => {}
    }
    Ok(())
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Paginated<BackgroundJob>>> {
    Ok(Json(
        state.db.list_background_jobs(page.limit, page.offset).await?,
    ))
}

// The enqueue and fetch routes share the `/jobs/{...}` segment (a task kind
// on POST, a job id on GET), so the id is parsed from a string here.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<SingleResponse<BackgroundJob>>> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::NotFound(format!("Job '{job_id}'")))?;
    let job = state
        .db
        .get_background_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job '{job_id}'")))?;
    Ok(Json(SingleResponse::new(job)))
}

/// POST /api/jobs/{id}/cancel - request cancellation. Pending jobs cancel
/// immediately; running jobs go to `cancelling` and the handler's poller
/// picks it up at the next checkpoint.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<SingleResponse<BackgroundJob>>> {
    let job = state
        .db
        .get_background_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job '{job_id}'")))?;

    if job.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "job '{job_id}' is already in a terminal state ({})",
            job.status
        )));
    }

    let next_status = match job.status {
        JobStatus::InProgress | JobStatus::Cancelling => JobStatus::Cancelling,
        _ => JobStatus::Canceled,
    };
    pipeline::update_job(
        &state,
        &job.project_id,
        job.id,
        UpdateBackgroundJob {
            status: Some(next_status),
            ..Default::default()
        },
    )
    .await;

    let job = state
        .db
        .get_background_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job '{job_id}'")))?;
    Ok(Json(SingleResponse::new(job)))
}

pub fn router() -> Router<Arc<AppState>> {
    // The `{kind_or_id}` segment is a task kind on POST and a job id on GET;
    // the router requires one consistent parameter name.
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{kind_or_id}/cancel", post(cancel_job))
        .route("/jobs/{kind_or_id}", get(get_job).post(enqueue_job))
}
