// crates/db/src/queries/sources.rs
// Project sources, the category-crawl hierarchy, and content-version backups.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_opt_json, parse_opt_ts, parse_ts, parse_uuid};
use crate::types::{
    CreateProjectSource, ProjectSource, SourceContentVersion, SourceHierarchyEdge, SourceKind,
    UpdateProjectSource,
};
use crate::{Database, DbResult};

fn source_from_row(row: &SqliteRow) -> DbResult<ProjectSource> {
    Ok(ProjectSource {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        kind: SourceKind::parse(&row.try_get::<String, _>("kind")?)?,
        url: row.try_get("url")?,
        raw_content: row.try_get("raw_content")?,
        content_selectors: parse_opt_json(row.try_get("content_selectors")?)?,
        category_selectors: parse_opt_json(row.try_get("category_selectors")?)?,
        pagination_selector: row.try_get("pagination_selector")?,
        url_exclusion_patterns: parse_opt_json(row.try_get("url_exclusion_patterns")?)?,
        max_pages_to_crawl: row.try_get("max_pages_to_crawl")?,
        max_crawl_depth: row.try_get("max_crawl_depth")?,
        last_crawled_at: parse_opt_ts("last_crawled_at", row.try_get("last_crawled_at")?)?,
        content_type: row.try_get("content_type")?,
        content_char_count: row.try_get("content_char_count")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_project_source(
        &self,
        create: &CreateProjectSource,
    ) -> DbResult<ProjectSource> {
        let now = now_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO project_sources (
                id, project_id, kind, url, raw_content, url_exclusion_patterns,
                max_pages_to_crawl, max_crawl_depth, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&create.project_id)
        .bind(create.kind.as_str())
        .bind(&create.url)
        .bind(&create.raw_content)
        .bind(
            create
                .url_exclusion_patterns
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(create.max_pages_to_crawl)
        .bind(create.max_crawl_depth)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        source_from_row(&row)
    }

    pub async fn get_project_source(&self, source_id: Uuid) -> DbResult<Option<ProjectSource>> {
        let row = sqlx::query("SELECT * FROM project_sources WHERE id = ?1")
            .bind(source_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn get_source_by_url(
        &self,
        project_id: &str,
        url: &str,
    ) -> DbResult<Option<ProjectSource>> {
        let row = sqlx::query("SELECT * FROM project_sources WHERE project_id = ?1 AND url = ?2")
            .bind(project_id)
            .bind(url)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn list_sources_for_project(&self, project_id: &str) -> DbResult<Vec<ProjectSource>> {
        let rows = sqlx::query(
            "SELECT * FROM project_sources WHERE project_id = ?1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    pub async fn update_project_source(
        &self,
        source_id: Uuid,
        update: &UpdateProjectSource,
    ) -> DbResult<Option<ProjectSource>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<Option<String>> = Vec::new();

        if let Some(url) = &update.url {
            sets.push("url = ?");
            args.push(Some(url.clone()));
        }
        if let Some(raw_content) = &update.raw_content {
            sets.push("raw_content = ?");
            args.push(Some(raw_content.clone()));
        }
        if let Some(selectors) = &update.content_selectors {
            sets.push("content_selectors = ?");
            args.push(Some(serde_json::to_string(selectors)?));
        }
        if let Some(selectors) = &update.category_selectors {
            sets.push("category_selectors = ?");
            args.push(Some(serde_json::to_string(selectors)?));
        }
        if let Some(pagination) = &update.pagination_selector {
            sets.push("pagination_selector = ?");
            // An empty selector clears the column (page has no next link).
            args.push(Some(pagination.clone()).filter(|p| !p.is_empty()));
        }
        if let Some(patterns) = &update.url_exclusion_patterns {
            sets.push("url_exclusion_patterns = ?");
            args.push(Some(serde_json::to_string(patterns)?));
        }
        if let Some(max_pages) = update.max_pages_to_crawl {
            sets.push("max_pages_to_crawl = ?");
            args.push(Some(max_pages.to_string()));
        }
        if let Some(max_depth) = update.max_crawl_depth {
            sets.push("max_crawl_depth = ?");
            args.push(Some(max_depth.to_string()));
        }
        if let Some(crawled_at) = &update.last_crawled_at {
            sets.push("last_crawled_at = ?");
            args.push(Some(crawled_at.to_rfc3339()));
        }
        if let Some(content_type) = &update.content_type {
            sets.push("content_type = ?");
            args.push(Some(content_type.clone()));
        }
        if let Some(count) = update.content_char_count {
            sets.push("content_char_count = ?");
            args.push(Some(count.to_string()));
        }

        if sets.is_empty() {
            return self.get_project_source(source_id).await;
        }

        let sql = format!(
            "UPDATE project_sources SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(source_id.to_string());

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn delete_project_source(&self, source_id: Uuid) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM project_sources WHERE id = ?1")
            .bind(source_id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Record a parent->child crawl edge. Idempotent on the edge pair.
    pub async fn add_source_hierarchy_edge(
        &self,
        project_id: &str,
        parent_source_id: Uuid,
        child_source_id: Uuid,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_source_hierarchy (id, project_id, parent_source_id, child_source_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (parent_source_id, child_source_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(parent_source_id.to_string())
        .bind(child_source_id.to_string())
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_source_hierarchy(
        &self,
        project_id: &str,
    ) -> DbResult<Vec<SourceHierarchyEdge>> {
        let rows = sqlx::query("SELECT * FROM project_source_hierarchy WHERE project_id = ?1")
            .bind(project_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SourceHierarchyEdge {
                    id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
                    project_id: row.try_get("project_id")?,
                    parent_source_id: parse_uuid(
                        "parent_source_id",
                        &row.try_get::<String, _>("parent_source_id")?,
                    )?,
                    child_source_id: parse_uuid(
                        "child_source_id",
                        &row.try_get::<String, _>("child_source_id")?,
                    )?,
                    created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    /// Snapshot a source's content before an overwrite.
    pub async fn create_source_content_version(
        &self,
        source_id: Uuid,
        content: &str,
    ) -> DbResult<SourceContentVersion> {
        let id = Uuid::new_v4();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO source_content_versions (id, source_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id.to_string())
        .bind(source_id.to_string())
        .bind(content)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(SourceContentVersion {
            id,
            source_id,
            content: content.to_string(),
            created_at: parse_ts("created_at", &now)?,
        })
    }

    pub async fn list_source_content_versions(
        &self,
        source_id: Uuid,
    ) -> DbResult<Vec<SourceContentVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM source_content_versions WHERE source_id = ?1 ORDER BY created_at DESC",
        )
        .bind(source_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SourceContentVersion {
                    id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
                    source_id: parse_uuid("source_id", &row.try_get::<String, _>("source_id")?)?,
                    content: row.try_get("content")?,
                    created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}
