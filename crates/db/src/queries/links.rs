// crates/db/src/queries/links.rs
// Link rows: one content URL per project, unique on (project_id, url).

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_opt_uuid, parse_ts, parse_uuid};
use crate::types::{Link, LinkBatchOutcome, LinkStatus, LinkWrite, UpdateLink};
use crate::{Database, DbResult};

pub(crate) fn link_from_row(row: &SqliteRow) -> DbResult<Link> {
    Ok(Link {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        url: row.try_get("url")?,
        status: LinkStatus::parse(&row.try_get::<String, _>("status")?)?,
        error_message: row.try_get("error_message")?,
        skip_reason: row.try_get("skip_reason")?,
        lorebook_entry_id: parse_opt_uuid("lorebook_entry_id", row.try_get("lorebook_entry_id")?)?,
        raw_content: row.try_get("raw_content")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}

impl Database {
    /// Insert pending links for the given URLs, skipping URLs the project
    /// already has. Returns the full rows for every URL in the input set.
    /// Idempotent: a second call with the same set inserts nothing.
    pub async fn create_links(&self, project_id: &str, urls: &[String]) -> DbResult<Vec<Link>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool().begin().await?;
        let now = now_rfc3339();
        for url in urls {
            sqlx::query(
                r#"
                INSERT INTO links (id, project_id, url, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (project_id, url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(project_id)
            .bind(url)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut links = Vec::with_capacity(urls.len());
        for url in urls {
            let row = sqlx::query("SELECT * FROM links WHERE project_id = ?1 AND url = ?2")
                .bind(project_id)
                .bind(url)
                .fetch_one(self.pool())
                .await?;
            links.push(link_from_row(&row)?);
        }
        Ok(links)
    }

    pub async fn get_link(&self, link_id: Uuid) -> DbResult<Option<Link>> {
        let row = sqlx::query("SELECT * FROM links WHERE id = ?1")
            .bind(link_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    pub async fn list_links_for_project(&self, project_id: &str) -> DbResult<Vec<Link>> {
        let rows = sqlx::query("SELECT * FROM links WHERE project_id = ?1 ORDER BY created_at ASC")
            .bind(project_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(link_from_row).collect()
    }

    /// Links eligible for entry processing: `pending` plus retryable `failed`.
    pub async fn list_processable_links(&self, project_id: &str) -> DbResult<Vec<Link>> {
        let rows = sqlx::query(
            "SELECT * FROM links
             WHERE project_id = ?1 AND status IN ('pending', 'failed')
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(link_from_row).collect()
    }

    /// Of `urls`, the subset already present for this project.
    pub async fn existing_link_urls(
        &self,
        project_id: &str,
        urls: &[String],
    ) -> DbResult<Vec<String>> {
        let mut existing = Vec::new();
        for chunk in urls.chunks(200) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT url FROM links WHERE project_id = ?1 AND url IN ({placeholders})"
            );
            let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(project_id);
            for url in chunk {
                query = query.bind(url);
            }
            existing.extend(query.fetch_all(self.pool()).await?.into_iter().map(|r| r.0));
        }
        Ok(existing)
    }

    pub async fn update_link(&self, link_id: Uuid, update: &UpdateLink) -> DbResult<Option<Link>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(error_message) = &update.error_message {
            sets.push("error_message = ?");
            args.push(error_message.clone());
        }
        if let Some(skip_reason) = &update.skip_reason {
            sets.push("skip_reason = ?");
            args.push(skip_reason.clone());
        }
        if let Some(entry_id) = update.lorebook_entry_id {
            sets.push("lorebook_entry_id = ?");
            args.push(entry_id.to_string());
        }
        if let Some(raw_content) = &update.raw_content {
            sets.push("raw_content = ?");
            args.push(raw_content.clone());
        }

        if sets.is_empty() {
            return self.get_link(link_id).await;
        }

        let sql = format!("UPDATE links SET {} WHERE id = ? RETURNING *", sets.join(", "));
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(link_id.to_string());

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(link_from_row).transpose()
    }

    /// Mark every listed link with `status`. Used to flip processable links
    /// to `processing` before the I/O phase starts.
    pub async fn set_links_status(&self, link_ids: &[Uuid], status: LinkStatus) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        for link_id in link_ids {
            sqlx::query("UPDATE links SET status = ?1 WHERE id = ?2")
                .bind(status.as_str())
                .bind(link_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cancellation cleanup: any link still mid-flight goes back to pending.
    pub async fn reset_processing_links(&self, project_id: &str) -> DbResult<u64> {
        let affected = sqlx::query(
            "UPDATE links SET status = 'pending' WHERE project_id = ?1 AND status = 'processing'",
        )
        .bind(project_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Phase-2 write for entry processing: apply one batch of link outcomes
    /// in a single transaction. Every outcome's audit log is inserted; link
    /// effects are committed atomically together. Returns the touched rows
    /// so the caller can emit events after the commit.
    pub async fn apply_link_write_batch(
        &self,
        batch: Vec<LinkWrite>,
    ) -> DbResult<LinkBatchOutcome> {
        let mut outcome = LinkBatchOutcome::default();
        let mut tx = self.pool().begin().await?;
        let now = now_rfc3339();

        for write in &batch {
            let log = match write {
                LinkWrite::Success { log, .. } | LinkWrite::Skipped { log, .. } => Some(log),
                LinkWrite::Failed { log, .. } => log.as_ref(),
            };
            if let Some(log) = log {
                sqlx::query(
                    r#"
                    INSERT INTO api_request_logs (
                        id, project_id, job_id, api_provider, model_name,
                        request, response, input_tokens, output_tokens,
                        calculated_cost, latency_ms, error, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&log.project_id)
                .bind(log.job_id.map(|id| id.to_string()))
                .bind(&log.api_provider)
                .bind(&log.model_name)
                .bind(serde_json::to_string(&log.request)?)
                .bind(log.response.as_ref().map(serde_json::to_string).transpose()?)
                .bind(log.input_tokens)
                .bind(log.output_tokens)
                .bind(log.calculated_cost)
                .bind(log.latency_ms)
                .bind(log.error as i64)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }

            match write {
                LinkWrite::Success {
                    link_id,
                    entry,
                    raw_content,
                    ..
                } => {
                    let entry_id = Uuid::new_v4();
                    sqlx::query(
                        "INSERT INTO lorebook_entries (id, project_id, title, content, keywords, source_url, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    )
                    .bind(entry_id.to_string())
                    .bind(&entry.project_id)
                    .bind(&entry.title)
                    .bind(&entry.content)
                    .bind(serde_json::to_string(&entry.keywords)?)
                    .bind(&entry.source_url)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        "UPDATE links SET status = 'completed', lorebook_entry_id = ?1, raw_content = ?2,
                         error_message = NULL, skip_reason = NULL WHERE id = ?3",
                    )
                    .bind(entry_id.to_string())
                    .bind(raw_content)
                    .bind(link_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
                LinkWrite::Skipped { link_id, reason, .. } => {
                    sqlx::query(
                        "UPDATE links SET status = 'skipped', skip_reason = ?1 WHERE id = ?2",
                    )
                    .bind(reason)
                    .bind(link_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
                LinkWrite::Failed {
                    link_id,
                    error_message,
                    ..
                } => {
                    sqlx::query(
                        "UPDATE links SET status = 'failed', error_message = ?1 WHERE id = ?2",
                    )
                    .bind(error_message)
                    .bind(link_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;

        for write in batch {
            let link = self
                .get_link(write.link_id())
                .await?
                .ok_or_else(|| crate::DbError::Corrupt("link vanished mid-batch".into()))?;
            match write {
                LinkWrite::Success { .. } => {
                    let entry_id = link.lorebook_entry_id.ok_or_else(|| {
                        crate::DbError::Corrupt("completed link missing entry id".into())
                    })?;
                    let entry = self.get_lorebook_entry(entry_id).await?.ok_or_else(|| {
                        crate::DbError::Corrupt("entry vanished mid-batch".into())
                    })?;
                    outcome.created.push((link, entry));
                }
                LinkWrite::Skipped { .. } => outcome.skipped.push(link),
                LinkWrite::Failed { .. } => outcome.failed.push(link),
            }
        }
        Ok(outcome)
    }

    pub async fn delete_link(&self, link_id: Uuid) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM links WHERE id = ?1")
            .bind(link_id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Per-status link counts for analytics.
    pub async fn link_status_counts(&self, project_id: &str) -> DbResult<Vec<(LinkStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM links WHERE project_id = ?1 GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((LinkStatus::parse(&status)?, count)))
            .collect()
    }
}
