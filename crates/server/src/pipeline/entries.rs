// crates/server/src/pipeline/entries.rs
//! Entry processing: the two-phase engine.
//!
//! Phase 1 is concurrent I/O - a semaphore caps in-flight link tasks, each
//! task waits on the project rate limiter, scrapes (or reuses cached
//! content), and makes one schema-constrained LLM call. No task touches the
//! database. Phase 2 harvests results and commits them in batches of ten
//! inside one transaction each, emitting progress after every batch so the
//! UI stays live without per-item write amplification.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use lorecard_core::llm::{Provider, ResponseSchema};
use lorecard_core::scrape::{FetchOptions, Scraper};
use lorecard_core::template;

use lorecard_db::types::{
    BackgroundJob, CreateLorebookEntry, JobPayload, JobResult, JobStatus, Link, LinkStatus,
    LinkWrite, ProcessEntriesResult, Project, ProjectStatus, UpdateBackgroundJob,
};

use super::{build_request, log_payload, update_job, PipelineError, PipelineResult};
use crate::jobs::CancelFlag;
use crate::state::AppState;

/// Cap on concurrent link I/O tasks, orthogonal to the worker-pool caps.
const CONCURRENT_LINK_TASKS: usize = 10;

/// Results are committed in chunks of this size for UI feedback; batching is
/// for responsiveness and transaction amortization, not correctness.
const DB_WRITE_BATCH_SIZE: usize = 10;

#[derive(Debug, Deserialize)]
struct EntryResponse {
    valid: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    entry: Option<EntryData>,
}

#[derive(Debug, Deserialize)]
struct EntryData {
    title: String,
    content: String,
    keywords: Vec<String>,
}

fn entry_schema() -> ResponseSchema {
    ResponseSchema::new(
        "lorebook_entry_response",
        json!({
            "type": "object",
            "properties": {
                "valid": {
                    "type": "boolean",
                    "description": "Whether the content meets the project criteria."
                },
                "reason": {
                    "type": ["string", "null"],
                    "description": "Why the content was skipped, when valid is false."
                },
                "entry": {
                    "type": ["object", "null"],
                    "properties": {
                        "title": { "type": "string" },
                        "content": { "type": "string" },
                        "keywords": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["title", "content", "keywords"]
                }
            },
            "required": ["valid", "reason", "entry"]
        }),
    )
}

#[derive(Default)]
struct Totals {
    created: i64,
    skipped: i64,
    failed: i64,
    processed: i64,
}

pub(super) async fn run(
    state: &Arc<AppState>,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    if !matches!(job.payload, JobPayload::ProcessProjectEntries) {
        return Err(PipelineError::Invalid(
            "invalid payload for process_project_entries".into(),
        ));
    }

    let links = state.db.list_processable_links(&project.id).await?;
    let total_links = links.len();

    if total_links == 0 {
        state
            .db
            .set_project_status(&project.id, ProjectStatus::Completed)
            .await?;
        update_job(
            state,
            &project.id,
            job.id,
            UpdateBackgroundJob {
                status: Some(JobStatus::Completed),
                progress: Some(100.0),
                result: Some(JobResult::ProcessEntries(ProcessEntriesResult::default())),
                ..Default::default()
            },
        )
        .await;
        return Ok(());
    }

    let provider = state.provider_for_project(project).await?;

    state
        .db
        .set_project_status(&project.id, ProjectStatus::Processing)
        .await?;
    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            total_items: Some(total_links as i64),
            processed_items: Some(0),
            progress: Some(0.0),
            ..Default::default()
        },
    )
    .await;

    // Mark every link up front so the UI shows the whole set as in-flight.
    let link_ids: Vec<Uuid> = links.iter().map(|l| l.id).collect();
    state
        .db
        .set_links_status(&link_ids, LinkStatus::Processing)
        .await?;
    for link_id in &link_ids {
        if let Ok(Some(link)) = state.db.get_link(*link_id).await {
            state
                .events
                .publish(&project.id, "link_updated", json!(link));
        }
    }

    let cancel = CancelFlag::new();
    let poller = cancel.spawn_poller(state.db.clone(), job.id);

    let globals: Arc<BTreeMap<String, String>> = Arc::new(
        state
            .db
            .list_global_templates()
            .await?
            .into_iter()
            .map(|t| (t.name, t.content))
            .collect(),
    );
    let semaphore = Arc::new(Semaphore::new(CONCURRENT_LINK_TASKS));
    let scraper = Arc::new(Scraper::new());
    let shared_project = Arc::new(project.clone());

    let mut tasks: JoinSet<Option<LinkWrite>> = JoinSet::new();
    for link in links {
        let cancel = cancel.clone();
        let semaphore = Arc::clone(&semaphore);
        let scraper = Arc::clone(&scraper);
        let project = Arc::clone(&shared_project);
        let provider = Arc::clone(&provider);
        let globals = Arc::clone(&globals);
        let job_id = job.id;
        let state = Arc::clone(state);

        tasks.spawn(async move {
            if cancel.is_cancelled() {
                return None;
            }
            let _permit = semaphore.acquire_owned().await.ok()?;
            state
                .rate_limiter
                .wait_for_slot(&project.id, project.requests_per_minute)
                .await;
            if cancel.is_cancelled() {
                return None;
            }
            Some(process_one_link(project, job_id, provider, scraper, globals, link).await)
        });
    }

    let mut totals = Totals::default();
    let mut batch: Vec<LinkWrite> = Vec::with_capacity(DB_WRITE_BATCH_SIZE);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(write)) => batch.push(write),
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "link task panicked"),
        }

        if batch.len() >= DB_WRITE_BATCH_SIZE {
            flush_batch(
                state,
                job,
                project,
                std::mem::take(&mut batch),
                &mut totals,
                total_links,
            )
            .await?;
        }
    }
    if !batch.is_empty() {
        flush_batch(state, job, project, batch, &mut totals, total_links).await?;
    }

    poller.abort();

    if cancel.is_cancelled() {
        update_job(
            state,
            &project.id,
            job.id,
            UpdateBackgroundJob {
                status: Some(JobStatus::Canceled),
                ..Default::default()
            },
        )
        .await;
        let reverted = state.db.reset_processing_links(&project.id).await?;
        tracing::info!(job_id = %job.id, reverted, "entry processing cancelled");
        return Ok(());
    }

    let final_status = if totals.failed == 0 {
        ProjectStatus::Completed
    } else {
        ProjectStatus::Failed
    };
    state.db.set_project_status(&project.id, final_status).await?;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::ProcessEntries(ProcessEntriesResult {
                entries_created: totals.created,
                entries_skipped: totals.skipped,
                entries_failed: totals.failed,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}

/// Phase 1 for one link. Pure I/O: no database writes.
async fn process_one_link(
    project: Arc<Project>,
    job_id: Uuid,
    provider: Arc<dyn Provider>,
    scraper: Arc<Scraper>,
    globals: Arc<BTreeMap<String, String>>,
    link: Link,
) -> LinkWrite {
    let content = match &link.raw_content {
        Some(cached) if !cached.is_empty() => cached.clone(),
        _ => match scraper.fetch(&link.url, FetchOptions::markdown()).await {
            Ok(content) => content,
            Err(e) => {
                return LinkWrite::Failed {
                    link_id: link.id,
                    error_message: e.to_string(),
                    log: None,
                }
            }
        },
    };

    let context = json!({
        "project": &*project,
        "content": &content,
        "source": &link,
        "globals": &*globals,
    });
    let messages = match template::render_messages(&project.templates.entry_creation, &context) {
        Ok(messages) => messages,
        Err(e) => {
            return LinkWrite::Failed {
                link_id: link.id,
                error_message: e.to_string(),
                log: None,
            }
        }
    };

    let request = build_request(&project, messages, Some(entry_schema()));
    let outcome = provider.generate(request).await;
    let log = log_payload(&project, job_id, &outcome);

    let response = match outcome {
        Ok(response) => response,
        Err(error) => {
            return LinkWrite::Failed {
                link_id: link.id,
                error_message: format!("provider call failed with status {}", error.status_code),
                log: Some(log),
            }
        }
    };

    let parsed: EntryResponse = match serde_json::from_value(response.content) {
        Ok(parsed) => parsed,
        Err(e) => {
            return LinkWrite::Failed {
                link_id: link.id,
                error_message: format!("response did not match entry schema: {e}"),
                log: Some(log),
            }
        }
    };

    match parsed {
        EntryResponse {
            valid: true,
            entry: Some(entry),
            ..
        } => LinkWrite::Success {
            link_id: link.id,
            entry: CreateLorebookEntry {
                project_id: project.id.clone(),
                title: entry.title,
                content: entry.content,
                keywords: entry.keywords,
                source_url: Some(link.url.clone()),
            },
            log,
            raw_content: content,
        },
        EntryResponse { reason, .. } => LinkWrite::Skipped {
            link_id: link.id,
            reason: reason.unwrap_or_else(|| "Content did not meet project criteria.".into()),
            log,
        },
    }
}

/// Phase 2: one transaction per batch, then events and progress.
async fn flush_batch(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
    batch: Vec<LinkWrite>,
    totals: &mut Totals,
    total_links: usize,
) -> PipelineResult<()> {
    let outcome = state.db.apply_link_write_batch(batch).await?;

    for (link, entry) in &outcome.created {
        state
            .events
            .publish(&project.id, "entry_created", json!(entry));
        state.events.publish(&project.id, "link_updated", json!(link));
    }
    for link in outcome.skipped.iter().chain(outcome.failed.iter()) {
        state.events.publish(&project.id, "link_updated", json!(link));
    }

    totals.created += outcome.created.len() as i64;
    totals.skipped += outcome.skipped.len() as i64;
    totals.failed += outcome.failed.len() as i64;
    totals.processed += outcome.processed() as i64;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            processed_items: Some(totals.processed),
            progress: Some(totals.processed as f64 / total_links.max(1) as f64 * 100.0),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}
