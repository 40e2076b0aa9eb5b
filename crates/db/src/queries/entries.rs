// crates/db/src/queries/entries.rs
// Lorebook entries: the finished output rows.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_ts, parse_uuid};
use crate::types::{CreateLorebookEntry, LorebookEntry, UpdateLorebookEntry};
use crate::{Database, DbResult};

fn entry_from_row(row: &SqliteRow) -> DbResult<LorebookEntry> {
    let keywords: String = row.try_get("keywords")?;
    Ok(LorebookEntry {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        keywords: serde_json::from_str(&keywords)?,
        source_url: row.try_get("source_url")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_lorebook_entry(
        &self,
        create: &CreateLorebookEntry,
    ) -> DbResult<LorebookEntry> {
        let now = now_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO lorebook_entries (id, project_id, title, content, keywords, source_url, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&create.project_id)
        .bind(&create.title)
        .bind(&create.content)
        .bind(serde_json::to_string(&create.keywords)?)
        .bind(&create.source_url)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        entry_from_row(&row)
    }

    pub async fn get_lorebook_entry(&self, entry_id: Uuid) -> DbResult<Option<LorebookEntry>> {
        let row = sqlx::query("SELECT * FROM lorebook_entries WHERE id = ?1")
            .bind(entry_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn list_entries_for_project(&self, project_id: &str) -> DbResult<Vec<LorebookEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM lorebook_entries WHERE project_id = ?1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn update_lorebook_entry(
        &self,
        entry_id: Uuid,
        update: &UpdateLorebookEntry,
    ) -> DbResult<Option<LorebookEntry>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(title) = &update.title {
            sets.push("title = ?");
            args.push(title.clone());
        }
        if let Some(content) = &update.content {
            sets.push("content = ?");
            args.push(content.clone());
        }
        if let Some(keywords) = &update.keywords {
            sets.push("keywords = ?");
            args.push(serde_json::to_string(keywords)?);
        }

        if sets.is_empty() {
            return self.get_lorebook_entry(entry_id).await;
        }

        let sql = format!(
            "UPDATE lorebook_entries SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(entry_id.to_string());

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn delete_lorebook_entry(&self, entry_id: Uuid) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM lorebook_entries WHERE id = ?1")
            .bind(entry_id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn count_entries_for_project(&self, project_id: &str) -> DbResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM lorebook_entries WHERE project_id = ?1")
                .bind(project_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::super::projects::test_fixtures::create_project_fixture;
    use crate::types::{CreateLorebookEntry, UpdateLorebookEntry};
    use crate::Database;

    #[tokio::test]
    async fn entry_crud_with_keywords() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();

        let entry = db
            .create_lorebook_entry(&CreateLorebookEntry {
                project_id: "p1".into(),
                title: "Whiterun".into(),
                content: "A city in the center of Skyrim.".into(),
                keywords: vec!["Whiterun".into(), "Dragonsreach".into()],
                source_url: Some("https://example.test/wiki/Whiterun".into()),
            })
            .await
            .unwrap();
        assert_eq!(entry.keywords.len(), 2);

        let updated = db
            .update_lorebook_entry(
                entry.id,
                &UpdateLorebookEntry {
                    keywords: Some(vec!["Whiterun".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.keywords, vec!["Whiterun".to_string()]);
        assert_eq!(db.count_entries_for_project("p1").await.unwrap(), 1);

        assert!(db.delete_lorebook_entry(entry.id).await.unwrap());
        assert_eq!(db.count_entries_for_project("p1").await.unwrap(), 0);
    }
}
