// crates/db/src/queries/jobs.rs
// The durable job queue: creation, the atomic claim primitive, patch
// updates, and the per-kind in-progress counts the worker caps on.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_ts, parse_uuid, Paginated, PaginationMeta};
use crate::types::{
    BackgroundJob, JobPayload, JobResult, JobStatus, TaskKind, UpdateBackgroundJob,
};
use crate::{Database, DbResult};

pub(crate) fn job_from_row(row: &SqliteRow) -> DbResult<BackgroundJob> {
    let task_kind = TaskKind::parse(&row.try_get::<String, _>("task_kind")?)?;
    let payload_json: Option<String> = row.try_get("payload")?;
    let result_json: Option<String> = row.try_get("result")?;
    Ok(BackgroundJob {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        task_kind,
        status: JobStatus::parse(&row.try_get::<String, _>("status")?)?,
        payload: JobPayload::from_json(task_kind, payload_json.as_deref())?,
        result: result_json
            .as_deref()
            .map(|json| JobResult::from_json(task_kind, json))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        total_items: row.try_get("total_items")?,
        processed_items: row.try_get("processed_items")?,
        progress: row.try_get("progress")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_background_job(
        &self,
        project_id: &str,
        payload: &JobPayload,
    ) -> DbResult<BackgroundJob> {
        let now = now_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO background_jobs (id, project_id, task_kind, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(payload.task_kind().as_str())
        .bind(payload.to_json()?)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        job_from_row(&row)
    }

    pub async fn get_background_job(&self, job_id: Uuid) -> DbResult<Option<BackgroundJob>> {
        let row = sqlx::query("SELECT * FROM background_jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Cheap status read for cancellation polling.
    pub async fn get_job_status(&self, job_id: Uuid) -> DbResult<Option<JobStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM background_jobs WHERE id = ?1")
                .bind(job_id.to_string())
                .fetch_optional(self.pool())
                .await?;
        row.map(|(s,)| JobStatus::parse(&s)).transpose()
    }

    pub async fn list_background_jobs(
        &self,
        limit: i64,
        offset: i64,
    ) -> DbResult<Paginated<BackgroundJob>> {
        let rows = sqlx::query(
            "SELECT * FROM background_jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        let data = rows.iter().map(job_from_row).collect::<DbResult<Vec<_>>>()?;

        let (total_items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM background_jobs")
            .fetch_one(self.pool())
            .await?;

        Ok(Paginated {
            data,
            meta: PaginationMeta::new(limit, offset, total_items),
        })
    }

    /// Atomically claim the oldest pending job: select and flip to
    /// `in_progress` in one statement. SQLite serializes writers, so no two
    /// claimers can return the same row; with no pending rows this is `None`.
    pub async fn claim_next_pending_job(&self) -> DbResult<Option<BackgroundJob>> {
        let row = sqlx::query(
            r#"
            UPDATE background_jobs
            SET status = 'in_progress', updated_at = ?1
            WHERE id = (
                SELECT id FROM background_jobs
                WHERE status = 'pending'
                ORDER BY created_at, id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_rfc3339())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn update_background_job(
        &self,
        job_id: Uuid,
        update: &UpdateBackgroundJob,
    ) -> DbResult<Option<BackgroundJob>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(result) = &update.result {
            sets.push("result = ?");
            args.push(serde_json::to_string(result)?);
        }
        if let Some(error_message) = &update.error_message {
            sets.push("error_message = ?");
            args.push(error_message.clone());
        }
        if let Some(total_items) = update.total_items {
            sets.push("total_items = ?");
            args.push(total_items.to_string());
        }
        if let Some(processed_items) = update.processed_items {
            sets.push("processed_items = ?");
            args.push(processed_items.to_string());
        }
        if let Some(progress) = update.progress {
            sets.push("progress = ?");
            args.push(progress.to_string());
        }

        if sets.is_empty() {
            return self.get_background_job(job_id).await;
        }

        let sql = format!(
            "UPDATE background_jobs SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(job_id.to_string());

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn count_in_progress_jobs_by_kind(&self, kind: TaskKind) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM background_jobs WHERE task_kind = ?1 AND status = 'in_progress'",
        )
        .bind(kind.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    pub async fn count_jobs_by_status(&self, status: JobStatus) -> DbResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM background_jobs WHERE status = ?1")
                .bind(status.as_str())
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Per-status job counts for analytics.
    pub async fn job_status_counts(&self, project_id: &str) -> DbResult<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM background_jobs WHERE project_id = ?1 GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((JobStatus::parse(&status)?, count)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::projects::test_fixtures::create_project_fixture;
    use crate::types::{
        ConfirmLinksPayload, ConfirmLinksResult, JobPayload, JobResult, JobStatus, TaskKind,
        UpdateBackgroundJob,
    };
    use crate::Database;
    use std::sync::Arc;

    async fn seeded_db() -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        db
    }

    #[tokio::test]
    async fn claim_flips_oldest_pending_to_in_progress() {
        let db = seeded_db().await;
        let first = db
            .create_background_job("p1", &JobPayload::GenerateSearchParams)
            .await
            .unwrap();
        let _second = db
            .create_background_job("p1", &JobPayload::ProcessProjectEntries)
            .await
            .unwrap();

        let claimed = db.claim_next_pending_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::InProgress);

        let reread = db.get_background_job(first.id).await.unwrap().unwrap();
        assert_eq!(reread.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_is_empty() {
        let db = seeded_db().await;
        assert!(db.claim_next_pending_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claimers_get_distinct_jobs() {
        let db = Arc::new(seeded_db().await);
        for _ in 0..4 {
            db.create_background_job("p1", &JobPayload::GenerateSearchParams)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(
                async move { db.claim_next_pending_job().await },
            ));
        }

        let mut claimed_ids = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap().unwrap() {
                claimed_ids.push(job.id);
            }
        }

        // Four jobs, eight claimers: exactly four wins, all distinct.
        assert_eq!(claimed_ids.len(), 4);
        claimed_ids.sort();
        claimed_ids.dedup();
        assert_eq!(claimed_ids.len(), 4);
        assert_eq!(db.count_jobs_by_status(JobStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_and_result_round_trip_through_rows() {
        let db = seeded_db().await;
        let payload = JobPayload::ConfirmLinks(ConfirmLinksPayload {
            urls: vec!["https://example.test/a".into()],
        });
        let job = db.create_background_job("p1", &payload).await.unwrap();
        assert_eq!(job.payload, payload);
        assert_eq!(job.task_kind, TaskKind::ConfirmLinks);

        db.update_background_job(
            job.id,
            &UpdateBackgroundJob {
                status: Some(JobStatus::Completed),
                result: Some(JobResult::ConfirmLinks(ConfirmLinksResult { links_saved: 1 })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let reread = db.get_background_job(job.id).await.unwrap().unwrap();
        assert_eq!(reread.status, JobStatus::Completed);
        assert_eq!(
            reread.result,
            Some(JobResult::ConfirmLinks(ConfirmLinksResult { links_saved: 1 }))
        );
    }

    #[tokio::test]
    async fn stale_recovery_resets_in_progress_jobs() {
        let db = seeded_db().await;
        db.create_background_job("p1", &JobPayload::ProcessProjectEntries)
            .await
            .unwrap();
        db.claim_next_pending_job().await.unwrap().unwrap();
        assert_eq!(
            db.count_jobs_by_status(JobStatus::InProgress).await.unwrap(),
            1
        );

        let (jobs, _links) = db.recover_stale_work().await.unwrap();
        assert_eq!(jobs, 1);
        assert_eq!(
            db.count_jobs_by_status(JobStatus::InProgress).await.unwrap(),
            0
        );
        assert_eq!(db.count_jobs_by_status(JobStatus::Pending).await.unwrap(), 1);
    }
}
