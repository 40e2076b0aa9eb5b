// crates/server/src/pipeline/search_params.rs
//! Derive search intent from the project prompt. The first pipeline stage:
//! one schema-constrained LLM call, stored on the project row.

use serde::Deserialize;
use serde_json::json;

use lorecard_core::llm::ResponseSchema;
use lorecard_core::template;

use lorecard_db::types::{
    BackgroundJob, EmptyResult, JobResult, JobStatus, Project, ProjectStatus, SearchParams,
    UpdateBackgroundJob, UpdateProject,
};

use super::{
    build_request, generate_logged, parse_content, template_context, update_job, PipelineError,
    PipelineResult,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SearchParamsResponse {
    purpose: String,
    extraction_notes: String,
    criteria: String,
}

fn response_schema() -> ResponseSchema {
    ResponseSchema::new(
        "search_params_response",
        json!({
            "type": "object",
            "properties": {
                "purpose": {
                    "type": "string",
                    "description": "Clear statement of what to gather, based on the request type."
                },
                "extraction_notes": {
                    "type": "string",
                    "description": "Guidelines for extraction."
                },
                "criteria": {
                    "type": "string",
                    "description": "Simple validation requirements."
                }
            },
            "required": ["purpose", "extraction_notes", "criteria"]
        }),
    )
}

pub(super) async fn run(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    if project.prompt.as_deref().unwrap_or("").trim().is_empty() {
        return Err(PipelineError::Invalid("project has no prompt".into()));
    }

    let provider = state.provider_for_project(project).await?;
    tracing::info!(job_id = %job.id, provider = provider.name(), "generating search params");

    let context = template_context(state, project, &[]).await?;
    let messages = template::render_messages(&project.templates.search_params_generation, &context)?;
    let request = build_request(project, messages, Some(response_schema()));

    let response = generate_logged(state, project, job.id, &provider, request).await?;
    let parsed: SearchParamsResponse = parse_content(&response.content)?;

    let mut update = UpdateProject {
        search_params: Some(SearchParams {
            purpose: parsed.purpose,
            extraction_notes: parsed.extraction_notes,
            criteria: parsed.criteria,
        }),
        ..Default::default()
    };
    if project.status == ProjectStatus::Draft {
        update.status = Some(ProjectStatus::SearchParamsGenerated);
    }
    state.db.update_project(&project.id, &update).await?;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::Empty(EmptyResult {})),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}
