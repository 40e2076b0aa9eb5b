// crates/server/src/pipeline/mod.rs
//! The task handlers behind the job queue, plus the plumbing they share:
//! template-context assembly, the generate-then-audit-log wrapper, and the
//! handler dispatch that turns uncaught errors into failed jobs.

mod character;
mod discover;
mod entries;
mod links;
mod search_params;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use lorecard_core::llm::{ChatRequest, Provider, ResponseSchema};
use lorecard_core::scrape::ScrapeError;
use lorecard_core::template::TemplateError;
use lorecard_core::ChatResponse;

use lorecard_db::types::{
    BackgroundJob, CreateApiRequestLog, JobStatus, Project, TaskKind, UpdateBackgroundJob,
};
use lorecard_db::DbError;

use crate::state::{AppState, ProviderResolveError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderResolveError),

    #[error("provider call failed with status {status}")]
    Generation { status: u16 },

    #[error("provider returned a response that does not match the schema: {0}")]
    BadResponse(String),

    #[error("{0}")]
    Invalid(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Entry point the worker spawns per claimed job. Dispatches to the matching
/// handler; an error marks the job failed unless cancellation already won.
pub async fn process_background_job(state: Arc<AppState>, job: BackgroundJob) {
    let project = match state.db.get_project(&job.project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => {
            tracing::error!(job_id = %job.id, project_id = %job.project_id, "project not found");
            fail_job(&state, job.id, "project not found").await;
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "failed to load project");
            fail_job(&state, job.id, &e.to_string()).await;
            return;
        }
    };

    let outcome = match job.task_kind {
        TaskKind::GenerateSearchParams => search_params::run(&state, &job, &project).await,
        TaskKind::DiscoverAndCrawlSources => discover::run(&state, &job, &project, true).await,
        TaskKind::RescanLinks => discover::run(&state, &job, &project, false).await,
        TaskKind::ConfirmLinks => links::run(&state, &job, &project).await,
        TaskKind::ProcessProjectEntries => entries::run(&state, &job, &project).await,
        TaskKind::FetchSourceContent => character::fetch_source_content(&state, &job, &project).await,
        TaskKind::GenerateCharacterCard => {
            character::generate_character_card(&state, &job, &project).await
        }
        TaskKind::RegenerateCharacterField => {
            character::regenerate_character_field(&state, &job, &project).await
        }
        TaskKind::AiEditSourceContent => {
            character::ai_edit_source_content(&state, &job, &project).await
        }
    };

    if let Err(e) = outcome {
        tracing::error!(job_id = %job.id, error = %e, "job handler failed");
        // Cancellation always terminates as canceled, never failed.
        match state.db.get_job_status(job.id).await {
            Ok(Some(JobStatus::Cancelling)) => {
                update_job(
                    &state,
                    &job.project_id,
                    job.id,
                    UpdateBackgroundJob {
                        status: Some(JobStatus::Canceled),
                        ..Default::default()
                    },
                )
                .await;
            }
            _ => fail_job(&state, job.id, &e.to_string()).await,
        }
    }
}

async fn fail_job(state: &AppState, job_id: Uuid, message: &str) {
    // Project id for the event comes from the row itself; the failure path
    // must not depend on earlier loads succeeding.
    let project_id = match state.db.get_background_job(job_id).await {
        Ok(Some(job)) => job.project_id,
        _ => String::new(),
    };
    update_job(
        state,
        &project_id,
        job_id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Failed),
            error_message: Some(message.to_string()),
            ..Default::default()
        },
    )
    .await;
}

/// Patch the job row and broadcast `job_status_update` with the fresh state.
pub(crate) async fn update_job(
    state: &AppState,
    project_id: &str,
    job_id: Uuid,
    update: UpdateBackgroundJob,
) {
    match state.db.update_background_job(job_id, &update).await {
        Ok(Some(job)) => {
            let payload = serde_json::to_value(&job).unwrap_or_else(|_| json!({ "id": job.id }));
            state.events.publish(project_id, "job_status_update", payload);
        }
        Ok(None) => tracing::warn!(%job_id, "job vanished during update"),
        Err(e) => tracing::error!(%job_id, error = %e, "failed to update job"),
    }
}

/// Assemble the template context shared by every LLM-backed stage:
/// the project, the global template map, and stage-specific bindings.
pub(crate) async fn template_context(
    state: &AppState,
    project: &Project,
    extra: &[(&str, Value)],
) -> PipelineResult<Value> {
    let globals: BTreeMap<String, String> = state
        .db
        .list_global_templates()
        .await?
        .into_iter()
        .map(|t| (t.name, t.content))
        .collect();

    let mut context = json!({
        "project": project,
        "globals": globals,
    });
    if let Value::Object(map) = &mut context {
        for (key, value) in extra {
            map.insert((*key).to_string(), value.clone());
        }
    }
    Ok(context)
}

/// Build a chat request from project settings, folding `model_parameters`
/// (temperature, reasoning) into the request.
pub(crate) fn build_request(
    project: &Project,
    messages: Vec<lorecard_core::ChatMessage>,
    schema: Option<ResponseSchema>,
) -> ChatRequest {
    let mut request = ChatRequest::new(&project.model_name, messages);
    request.response_format = schema;
    if let Some(temperature) = project.model_parameters.get("temperature").and_then(Value::as_f64) {
        request.temperature = Some(temperature.clamp(0.0, 2.0));
    }
    if let Some(reasoning) = project.model_parameters.get("reasoning") {
        request.reasoning = serde_json::from_value(reasoning.clone()).ok();
    }
    request
}

/// Turn a finished generate call (either arm) into its audit-log row.
pub(crate) fn log_payload(
    project: &Project,
    job_id: Uuid,
    outcome: &Result<ChatResponse, lorecard_core::ChatError>,
) -> CreateApiRequestLog {
    match outcome {
        Ok(response) => CreateApiRequestLog {
            project_id: project.id.clone(),
            job_id: Some(job_id),
            api_provider: project.api_provider.clone(),
            model_name: project.model_name.clone(),
            request: response.raw_request.clone(),
            response: Some(response.raw_response.clone()),
            input_tokens: Some(response.usage.prompt_tokens),
            output_tokens: Some(response.usage.completion_tokens),
            calculated_cost: Some(response.usage.cost),
            latency_ms: response.latency_ms,
            error: false,
        },
        Err(error) => CreateApiRequestLog {
            project_id: project.id.clone(),
            job_id: Some(job_id),
            api_provider: project.api_provider.clone(),
            model_name: project.model_name.clone(),
            request: error.raw_request.clone(),
            response: error.raw_response.clone(),
            input_tokens: None,
            output_tokens: None,
            calculated_cost: None,
            latency_ms: error.latency_ms,
            error: true,
        },
    }
}

/// One LLM call with its mandatory audit log: generate, insert exactly one
/// `api_request_logs` row for whichever arm came back, then surface the
/// response or a `Generation` error.
pub(crate) async fn generate_logged(
    state: &AppState,
    project: &Project,
    job_id: Uuid,
    provider: &Arc<dyn Provider>,
    request: ChatRequest,
) -> PipelineResult<ChatResponse> {
    let outcome = provider.generate(request).await;
    state
        .db
        .create_api_request_log(&log_payload(project, job_id, &outcome))
        .await?;

    match outcome {
        Ok(response) => Ok(response),
        Err(error) => Err(PipelineError::Generation {
            status: error.status_code,
        }),
    }
}

/// Parse a schema-constrained response body into the expected shape.
pub(crate) fn parse_content<T: serde::de::DeserializeOwned>(
    content: &Value,
) -> PipelineResult<T> {
    serde_json::from_value(content.clone())
        .map_err(|e| PipelineError::BadResponse(e.to_string()))
}
