// crates/server/src/pipeline/links.rs
//! Confirm curated URLs into pending Link rows. Idempotent on
//! (project, url); the user reviews discovery output before anything is
//! persisted, so this is the only stage that writes links.

use serde_json::json;

use lorecard_db::types::{
    BackgroundJob, ConfirmLinksResult, JobPayload, JobResult, JobStatus, Project, ProjectStatus,
    UpdateBackgroundJob,
};

use super::{update_job, PipelineError, PipelineResult};
use crate::state::AppState;

pub(super) async fn run(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    let JobPayload::ConfirmLinks(payload) = &job.payload else {
        return Err(PipelineError::Invalid(
            "invalid payload for confirm_links".into(),
        ));
    };

    if payload.urls.is_empty() {
        tracing::warn!(job_id = %job.id, "confirm_links received no URLs");
        update_job(
            state,
            &project.id,
            job.id,
            UpdateBackgroundJob {
                status: Some(JobStatus::Completed),
                result: Some(JobResult::ConfirmLinks(ConfirmLinksResult { links_saved: 0 })),
                ..Default::default()
            },
        )
        .await;
        return Ok(());
    }

    let links = state.db.create_links(&project.id, &payload.urls).await?;
    state
        .events
        .publish(&project.id, "links_created", json!({ "links": &links }));

    if project.status == ProjectStatus::SelectorGenerated {
        state
            .db
            .set_project_status(&project.id, ProjectStatus::LinksExtracted)
            .await?;
    }

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::ConfirmLinks(ConfirmLinksResult {
                links_saved: links.len() as i64,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}
