// crates/server/src/jobs/worker.rs
//! The worker main loop: reap finished tasks, claim the oldest pending job,
//! enforce per-kind parallelism, spawn the handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use lorecard_db::types::{BackgroundJob, JobStatus, TaskKind, UpdateBackgroundJob};

use crate::pipeline;
use crate::state::AppState;

const IDLE_SLEEP: Duration = Duration::from_secs(2);
const SATURATED_SLEEP: Duration = Duration::from_secs(1);
const ERROR_SLEEP: Duration = Duration::from_secs(4);

/// Max concurrent in-flight jobs for one task kind. Every kind serializes
/// its own jobs; cross-kind work still runs in parallel.
pub fn parallel_limit(_kind: TaskKind) -> i64 {
    1
}

/// Pool admission: the sum of all per-kind caps.
pub fn max_workers() -> usize {
    TaskKind::ALL
        .iter()
        .map(|k| parallel_limit(*k) as usize)
        .sum()
}

/// Run the background worker until the task is aborted (process shutdown).
pub async fn run_worker(state: Arc<AppState>) {
    tracing::info!("starting background worker");
    let mut active: HashMap<Uuid, (TaskKind, JoinHandle<()>)> = HashMap::new();

    loop {
        reap_finished(&mut active).await;

        if active.len() >= max_workers() {
            tokio::time::sleep(SATURATED_SLEEP).await;
            continue;
        }

        match state.db.claim_next_pending_job().await {
            Ok(Some(job)) => {
                let kind = job.task_kind;
                // The claim already flipped this job to in_progress, so the
                // count includes it; over-cap means another job of this kind
                // is still running and this one must wait its turn.
                let in_flight = match state.db.count_in_progress_jobs_by_kind(kind).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to count in-flight jobs");
                        requeue(&state, &job).await;
                        tokio::time::sleep(ERROR_SLEEP).await;
                        continue;
                    }
                };

                if in_flight <= parallel_limit(kind) {
                    tracing::info!(
                        job_id = %job.id,
                        task_kind = %kind,
                        in_flight,
                        "worker claimed job"
                    );
                    let job_id = job.id;
                    let task_state = Arc::clone(&state);
                    let handle =
                        tokio::spawn(
                            async move { pipeline::process_background_job(task_state, job).await },
                        );
                    active.insert(job_id, (kind, handle));
                } else {
                    tracing::warn!(job_id = %job.id, task_kind = %kind, "kind at capacity, requeueing");
                    requeue(&state, &job).await;
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
            Ok(None) => {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "worker claim failed");
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
}

async fn reap_finished(active: &mut HashMap<Uuid, (TaskKind, JoinHandle<()>)>) {
    let finished: Vec<Uuid> = active
        .iter()
        .filter(|(_, (_, handle))| handle.is_finished())
        .map(|(id, _)| *id)
        .collect();

    for job_id in finished {
        if let Some((kind, handle)) = active.remove(&job_id) {
            match handle.await {
                Ok(()) => tracing::info!(%job_id, task_kind = %kind, "job task finished"),
                Err(e) => tracing::error!(%job_id, task_kind = %kind, error = %e, "job task panicked"),
            }
        }
    }
}

/// Put a claimed-but-unrunnable job back in the queue.
async fn requeue(state: &AppState, job: &BackgroundJob) {
    let update = UpdateBackgroundJob {
        status: Some(JobStatus::Pending),
        ..Default::default()
    };
    if let Err(e) = state.db.update_background_job(job.id, &update).await {
        tracing::error!(job_id = %job.id, error = %e, "failed to requeue job");
    }
}
