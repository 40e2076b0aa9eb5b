// crates/db/src/queries/projects.rs
// Project CRUD. Templates, model parameters, and search params live in JSON
// columns; deletes cascade to sources, links, entries, jobs, and logs.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{now_rfc3339, parse_opt_json, parse_opt_uuid, parse_ts, Paginated, PaginationMeta};
use crate::types::{CreateProject, Project, ProjectKind, ProjectStatus, UpdateProject};
use crate::{Database, DbResult};

pub(crate) fn project_from_row(row: &SqliteRow) -> DbResult<Project> {
    let templates: String = row.try_get("templates")?;
    let model_parameters: String = row.try_get("model_parameters")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        prompt: row.try_get("prompt")?,
        kind: ProjectKind::parse(&row.try_get::<String, _>("kind")?)?,
        templates: serde_json::from_str(&templates)?,
        credential_id: parse_opt_uuid("credential_id", row.try_get("credential_id")?)?,
        api_provider: row.try_get("api_provider")?,
        model_name: row.try_get("model_name")?,
        model_parameters: serde_json::from_str(&model_parameters)?,
        requests_per_minute: row.try_get("requests_per_minute")?,
        search_params: parse_opt_json(row.try_get("search_params")?)?,
        status: ProjectStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_project(&self, create: &CreateProject) -> DbResult<Project> {
        let now = now_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, prompt, kind, templates, credential_id,
                api_provider, model_name, model_parameters, requests_per_minute,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            RETURNING *
            "#,
        )
        .bind(&create.id)
        .bind(&create.name)
        .bind(&create.prompt)
        .bind(create.kind.as_str())
        .bind(serde_json::to_string(&create.templates)?)
        .bind(create.credential_id.map(|id| id.to_string()))
        .bind(&create.api_provider)
        .bind(&create.model_name)
        .bind(serde_json::to_string(&create.model_parameters)?)
        .bind(create.requests_per_minute)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        project_from_row(&row)
    }

    pub async fn get_project(&self, project_id: &str) -> DbResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list_projects(&self, limit: i64, offset: i64) -> DbResult<Paginated<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        let data = rows
            .iter()
            .map(project_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        let (total_items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects")
            .fetch_one(self.pool())
            .await?;

        Ok(Paginated {
            data,
            meta: PaginationMeta::new(limit, offset, total_items),
        })
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        update: &UpdateProject,
    ) -> DbResult<Option<Project>> {
        // Dynamic SET list over the patched fields only.
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(name) = &update.name {
            sets.push("name = ?");
            args.push(name.clone());
        }
        if let Some(prompt) = &update.prompt {
            sets.push("prompt = ?");
            args.push(prompt.clone());
        }
        if let Some(templates) = &update.templates {
            sets.push("templates = ?");
            args.push(serde_json::to_string(templates)?);
        }
        if let Some(credential_id) = &update.credential_id {
            sets.push("credential_id = ?");
            args.push(credential_id.to_string());
        }
        if let Some(api_provider) = &update.api_provider {
            sets.push("api_provider = ?");
            args.push(api_provider.clone());
        }
        if let Some(model_name) = &update.model_name {
            sets.push("model_name = ?");
            args.push(model_name.clone());
        }
        if let Some(model_parameters) = &update.model_parameters {
            sets.push("model_parameters = ?");
            args.push(serde_json::to_string(model_parameters)?);
        }
        if let Some(rpm) = update.requests_per_minute {
            sets.push("requests_per_minute = ?");
            args.push(rpm.to_string());
        }
        if let Some(search_params) = &update.search_params {
            sets.push("search_params = ?");
            args.push(serde_json::to_string(search_params)?);
        }
        if let Some(status) = update.status {
            sets.push("status = ?");
            args.push(status.as_str().to_string());
        }

        if sets.is_empty() {
            return self.get_project(project_id).await;
        }

        let sql = format!(
            "UPDATE projects SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(project_id);

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(project_from_row).transpose()
    }

    /// Status-only update helper for the pipeline handlers.
    pub async fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> DbResult<()> {
        sqlx::query("UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(project_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Cascades to sources, links, entries, jobs, and logs.
    pub async fn delete_project(&self, project_id: &str) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM projects WHERE id = ?1")
            .bind(project_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::create_project_fixture;
    use crate::types::{ProjectStatus, SearchParams, UpdateProject};
    use crate::Database;

    #[tokio::test]
    async fn create_get_update_delete() {
        let db = Database::new_in_memory().await.unwrap();
        let project = db
            .create_project(&create_project_fixture("skyrim"))
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Draft);
        assert_eq!(project.requests_per_minute, 15);

        let update = UpdateProject {
            search_params: Some(SearchParams {
                purpose: "gather locations".into(),
                extraction_notes: "names and holds".into(),
                criteria: "dedicated articles only".into(),
            }),
            status: Some(ProjectStatus::SearchParamsGenerated),
            ..Default::default()
        };
        let updated = db.update_project("skyrim", &update).await.unwrap().unwrap();
        assert_eq!(updated.status, ProjectStatus::SearchParamsGenerated);
        assert_eq!(updated.search_params.unwrap().purpose, "gather locations");

        assert!(db.delete_project("skyrim").await.unwrap());
        assert!(db.get_project("skyrim").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_update_is_a_read() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        let project = db
            .update_project("p1", &UpdateProject::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.id, "p1");
    }
}
