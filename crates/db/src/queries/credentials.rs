// crates/db/src/queries/credentials.rs
// Credential rows. The `secrets` column is an encrypted key/value bundle;
// encryption happens above this layer.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_ts, parse_uuid};
use crate::types::Credential;
use crate::{Database, DbResult};

fn credential_from_row(row: &SqliteRow) -> DbResult<Credential> {
    Ok(Credential {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        api_provider: row.try_get("api_provider")?,
        secrets: row.try_get("secrets")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    pub async fn create_credential(
        &self,
        name: &str,
        api_provider: &str,
        encrypted_secrets: &str,
    ) -> DbResult<Credential> {
        let now = now_rfc3339();
        let row = sqlx::query(
            "INSERT INTO credentials (id, name, api_provider, secrets, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(api_provider)
        .bind(encrypted_secrets)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        credential_from_row(&row)
    }

    pub async fn get_credential(&self, credential_id: Uuid) -> DbResult<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?1")
            .bind(credential_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    pub async fn list_credentials(&self) -> DbResult<Vec<Credential>> {
        let rows = sqlx::query("SELECT * FROM credentials ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(credential_from_row).collect()
    }

    pub async fn update_credential(
        &self,
        credential_id: Uuid,
        name: Option<&str>,
        encrypted_secrets: Option<&str>,
    ) -> DbResult<Option<Credential>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(name) = name {
            sets.push("name = ?");
            args.push(name.to_string());
        }
        if let Some(secrets) = encrypted_secrets {
            sets.push("secrets = ?");
            args.push(secrets.to_string());
        }
        if sets.is_empty() {
            return self.get_credential(credential_id).await;
        }

        let sql = format!(
            "UPDATE credentials SET {}, updated_at = ? WHERE id = ? RETURNING *",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        query = query.bind(now_rfc3339()).bind(credential_id.to_string());

        let row = query.fetch_optional(self.pool()).await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    pub async fn delete_credential(&self, credential_id: Uuid) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM credentials WHERE id = ?1")
            .bind(credential_id.to_string())
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
    async fn credential_crud() {
        let db = Database::new_in_memory().await.unwrap();
        let credential = db
            .create_credential("or-key", "openrouter", "ciphertext==")
            .await
            .unwrap();
        assert_eq!(credential.api_provider, "openrouter");

        let updated = db
            .update_credential(credential.id, Some("renamed"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.secrets, "ciphertext==");

        assert_eq!(db.list_credentials().await.unwrap().len(), 1);
        assert!(db.delete_credential(credential.id).await.unwrap());
    }
}
