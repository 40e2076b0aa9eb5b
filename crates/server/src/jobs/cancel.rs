// crates/server/src/jobs/cancel.rs
//! Cooperative cancellation: a shared flag plus a polling sidecar that
//! watches the job row for the `cancelling` status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use lorecard_db::types::JobStatus;
use lorecard_db::Database;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Checked by handlers at documented points (between batches, before each
/// rate-limited LLM call). Never interrupts arbitrary code.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Spawn the polling sidecar for a running job. The returned handle is
    /// aborted by the caller once the handler finishes.
    pub fn spawn_poller(&self, db: Database, job_id: Uuid) -> JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            loop {
                if flag.is_cancelled() {
                    break;
                }
                match db.get_job_status(job_id).await {
                    Ok(Some(JobStatus::Cancelling)) => {
                        tracing::info!(%job_id, "cancellation requested");
                        flag.cancel();
                        break;
                    }
                    Ok(Some(status)) if status.is_terminal() => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(%job_id, error = %e, "cancellation poll failed");
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorecard_db::types::{JobPayload, UpdateBackgroundJob};

    #[tokio::test(start_paused = true)]
    async fn poller_sets_flag_when_job_goes_cancelling() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(
            &lorecard_db::types::CreateProject {
                id: "p1".into(),
                name: "p1".into(),
                prompt: None,
                kind: lorecard_db::types::ProjectKind::Lorebook,
                templates: serde_json::from_str("{}").unwrap(),
                credential_id: None,
                api_provider: "openrouter".into(),
                model_name: "m".into(),
                model_parameters: serde_json::json!({}),
                requests_per_minute: 15,
            },
        )
        .await
        .unwrap();
        let job = db
            .create_background_job("p1", &JobPayload::ProcessProjectEntries)
            .await
            .unwrap();

        let flag = CancelFlag::new();
        let poller = flag.spawn_poller(db.clone(), job.id);

        db.update_background_job(
            job.id,
            &UpdateBackgroundJob {
                status: Some(lorecard_db::types::JobStatus::Cancelling),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Let the poller tick past its interval.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(flag.is_cancelled());
        poller.abort();
    }
}
