// crates/db/src/queries/analytics.rs
// Per-project aggregates over the audit log plus link/job status histograms.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::Row;

use crate::types::{JobStatus, LinkStatus};
use crate::{Database, DbResult};

#[derive(Debug, Clone, Serialize)]
pub struct ProjectAnalytics {
    pub total_requests: i64,
    /// Sum of known costs only; `has_unknown_costs` flags sentinel rows.
    pub total_cost: f64,
    pub has_unknown_costs: bool,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub average_latency_ms: f64,
    pub link_status_counts: HashMap<LinkStatus, i64>,
    pub job_status_counts: HashMap<JobStatus, i64>,
    pub total_lorebook_entries: i64,
    pub total_links: i64,
    pub total_jobs: i64,
}

impl Database {
    pub async fn get_project_analytics(&self, project_id: &str) -> DbResult<ProjectAnalytics> {
        let api_row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(CASE WHEN calculated_cost >= 0 THEN calculated_cost ELSE 0 END), 0.0) AS total_cost,
                COALESCE(SUM(input_tokens), 0) AS total_input_tokens,
                COALESCE(SUM(output_tokens), 0) AS total_output_tokens,
                COALESCE(AVG(latency_ms), 0.0) AS average_latency_ms,
                COALESCE(MAX(CASE WHEN calculated_cost < 0 THEN 1 ELSE 0 END), 0) AS has_unknown_costs
            FROM api_request_logs
            WHERE project_id = ?1
            "#,
        )
        .bind(project_id)
        .fetch_one(self.pool())
        .await?;

        let mut link_status_counts: HashMap<LinkStatus, i64> =
            LinkStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in self.link_status_counts(project_id).await? {
            link_status_counts.insert(status, count);
        }
        let total_links = link_status_counts.values().sum();

        let mut job_status_counts: HashMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in self.job_status_counts(project_id).await? {
            job_status_counts.insert(status, count);
        }
        let total_jobs = job_status_counts.values().sum();

        Ok(ProjectAnalytics {
            total_requests: api_row.try_get("total_requests")?,
            total_cost: api_row.try_get("total_cost")?,
            has_unknown_costs: api_row.try_get::<i64, _>("has_unknown_costs")? != 0,
            total_input_tokens: api_row.try_get("total_input_tokens")?,
            total_output_tokens: api_row.try_get("total_output_tokens")?,
            average_latency_ms: api_row.try_get("average_latency_ms")?,
            link_status_counts,
            job_status_counts,
            total_lorebook_entries: self.count_entries_for_project(project_id).await?,
            total_links,
            total_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::projects::test_fixtures::create_project_fixture;
    use crate::types::{CreateApiRequestLog, LinkStatus};
    use crate::Database;
    use serde_json::json;

    fn log(cost: Option<f64>, error: bool) -> CreateApiRequestLog {
        CreateApiRequestLog {
            project_id: "p1".into(),
            job_id: None,
            api_provider: "openrouter".into(),
            model_name: "m".into(),
            request: json!({}),
            response: None,
            input_tokens: Some(100),
            output_tokens: Some(50),
            calculated_cost: cost,
            latency_ms: 200,
            error,
        }
    }

    #[tokio::test]
    async fn aggregates_ignore_unknown_cost_but_flag_it() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        db.create_api_request_log(&log(Some(0.5), false)).await.unwrap();
        db.create_api_request_log(&log(Some(-1.0), false)).await.unwrap();
        db.create_links("p1", &["https://example.test/a".into()])
            .await
            .unwrap();

        let analytics = db.get_project_analytics("p1").await.unwrap();
        assert_eq!(analytics.total_requests, 2);
        assert!((analytics.total_cost - 0.5).abs() < 1e-9);
        assert!(analytics.has_unknown_costs);
        assert_eq!(analytics.total_input_tokens, 200);
        assert_eq!(analytics.total_links, 1);
        assert_eq!(analytics.link_status_counts[&LinkStatus::Pending], 1);
    }

    #[tokio::test]
    async fn empty_project_yields_zeroes() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        let analytics = db.get_project_analytics("p1").await.unwrap();
        assert_eq!(analytics.total_requests, 0);
        assert_eq!(analytics.total_cost, 0.0);
        assert!(!analytics.has_unknown_costs);
    }
}
