// crates/db/src/queries/logs.rs
// Immutable audit records, one per external LLM call.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_opt_json, parse_opt_uuid, parse_ts, parse_uuid, Paginated, PaginationMeta};
use crate::types::{ApiRequestLog, CreateApiRequestLog};
use crate::{Database, DbResult};

fn log_from_row(row: &SqliteRow) -> DbResult<ApiRequestLog> {
    let request: String = row.try_get("request")?;
    Ok(ApiRequestLog {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        job_id: parse_opt_uuid("job_id", row.try_get("job_id")?)?,
        api_provider: row.try_get("api_provider")?,
        model_name: row.try_get("model_name")?,
        request: serde_json::from_str(&request)?,
        response: parse_opt_json(row.try_get("response")?)?,
        input_tokens: row.try_get("input_tokens")?,
        output_tokens: row.try_get("output_tokens")?,
        calculated_cost: row.try_get("calculated_cost")?,
        latency_ms: row.try_get("latency_ms")?,
        error: row.try_get::<i64, _>("error")? != 0,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}

impl Database {
    pub async fn create_api_request_log(
        &self,
        create: &CreateApiRequestLog,
    ) -> DbResult<ApiRequestLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO api_request_logs (
                id, project_id, job_id, api_provider, model_name,
                request, response, input_tokens, output_tokens,
                calculated_cost, latency_ms, error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&create.project_id)
        .bind(create.job_id.map(|id| id.to_string()))
        .bind(&create.api_provider)
        .bind(&create.model_name)
        .bind(serde_json::to_string(&create.request)?)
        .bind(
            create
                .response
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(create.input_tokens)
        .bind(create.output_tokens)
        .bind(create.calculated_cost)
        .bind(create.latency_ms)
        .bind(create.error as i64)
        .bind(now_rfc3339())
        .fetch_one(self.pool())
        .await?;
        log_from_row(&row)
    }

    pub async fn list_api_request_logs(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<Paginated<ApiRequestLog>> {
        let rows = sqlx::query(
            "SELECT * FROM api_request_logs WHERE project_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        let data = rows.iter().map(log_from_row).collect::<DbResult<Vec<_>>>()?;

        let (total_items,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM api_request_logs WHERE project_id = ?1")
                .bind(project_id)
                .fetch_one(self.pool())
                .await?;

        Ok(Paginated {
            data,
            meta: PaginationMeta::new(limit, offset, total_items),
        })
    }

    pub async fn count_api_request_logs(&self, project_id: &str) -> DbResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM api_request_logs WHERE project_id = ?1")
                .bind(project_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
