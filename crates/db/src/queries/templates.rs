// crates/db/src/queries/templates.rs
// Global templates: process-wide prompt fragments addressed by stable id.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{now_rfc3339, parse_ts};
use crate::types::GlobalTemplate;
use crate::{Database, DbResult};

fn template_from_row(row: &SqliteRow) -> DbResult<GlobalTemplate> {
    Ok(GlobalTemplate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        content: row.try_get("content")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_global_template(
        &self,
        id: &str,
        name: &str,
        content: &str,
    ) -> DbResult<GlobalTemplate> {
        let now = now_rfc3339();
        let row = sqlx::query(
            "INSERT INTO global_templates (id, name, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(content)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        template_from_row(&row)
    }

    /// Seed helper: insert only when the id is not present yet, so operator
    /// edits survive restarts.
    pub async fn ensure_global_template(&self, id: &str, name: &str, content: &str) -> DbResult<bool> {
        let now = now_rfc3339();
        let affected = sqlx::query(
            "INSERT INTO global_templates (id, name, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(name)
        .bind(content)
        .bind(&now)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn get_global_template(&self, id: &str) -> DbResult<Option<GlobalTemplate>> {
        let row = sqlx::query("SELECT * FROM global_templates WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn list_global_templates(&self) -> DbResult<Vec<GlobalTemplate>> {
        let rows = sqlx::query("SELECT * FROM global_templates ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(template_from_row).collect()
    }

    pub async fn update_global_template(
        &self,
        id: &str,
        name: Option<&str>,
        content: Option<&str>,
    ) -> DbResult<Option<GlobalTemplate>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(name) = name {
            sets.push("name = ?");
            args.push(name.to_string());
        }
        if let Some(content) = content {
            sets.push("content = ?");
            args.push(content.to_string());
        }
        if sets.is_empty() {
            return self.get_global_template(id).await;
        }

        let sql = format!(
            "UPDATE global_templates SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(id);

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn delete_global_template(&self, id: &str) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM global_templates WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[tokio::test]
    async fn ensure_does_not_clobber_edits() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db
            .ensure_global_template("lorebook-definition", "lorebook_definition", "v1")
            .await
            .unwrap());

        db.update_global_template("lorebook-definition", None, Some("operator edited"))
            .await
            .unwrap();

        // Re-seeding is a no-op.
        assert!(!db
            .ensure_global_template("lorebook-definition", "lorebook_definition", "v1")
            .await
            .unwrap());
        let template = db
            .get_global_template("lorebook-definition")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(template.content, "operator edited");
    }
}
