// crates/db/src/queries/cards.rs
// Character cards: at most one per project, upserted whole and patched per
// field by the regeneration pipeline.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_rfc3339, parse_ts, parse_uuid};
use crate::types::{CardField, CardFields, CharacterCard};
use crate::{Database, DbResult};

fn card_from_row(row: &SqliteRow) -> DbResult<CharacterCard> {
    Ok(CharacterCard {
        id: parse_uuid("id", &row.try_get::<String, _>("id")?)?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        persona: row.try_get("persona")?,
        scenario: row.try_get("scenario")?,
        first_message: row.try_get("first_message")?,
        example_messages: row.try_get("example_messages")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Database {
    /// Insert or replace the project's single card.
    pub async fn upsert_character_card(
        &self,
        project_id: &str,
        fields: &CardFields,
    ) -> DbResult<CharacterCard> {
        let now = now_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO character_cards (
                id, project_id, name, description, persona, scenario,
                first_message, example_messages, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT (project_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                persona = excluded.persona,
                scenario = excluded.scenario,
                first_message = excluded.first_message,
                example_messages = excluded.example_messages,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.persona)
        .bind(&fields.scenario)
        .bind(&fields.first_message)
        .bind(&fields.example_messages)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;
        card_from_row(&row)
    }

    pub async fn get_character_card(&self, project_id: &str) -> DbResult<Option<CharacterCard>> {
        let row = sqlx::query("SELECT * FROM character_cards WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(card_from_row).transpose()
    }

    /// Patch one named field of the project's card.
    pub async fn set_character_card_field(
        &self,
        project_id: &str,
        field: CardField,
        value: &str,
    ) -> DbResult<Option<CharacterCard>> {
        // Column names come from the enum, not user input.
        let sql = format!(
            "UPDATE character_cards SET {} = ?1, updated_at = ?2 WHERE project_id = ?3 RETURNING *",
            field.as_str()
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .bind(now_rfc3339())
            .bind(project_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(card_from_row).transpose()
    }

    pub async fn delete_character_card(&self, project_id: &str) -> DbResult<bool> {
        let affected = sqlx::query("DELETE FROM character_cards WHERE project_id = ?1")
            .bind(project_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::projects::test_fixtures::create_project_fixture;
    use crate::types::{CardField, CardFields};
    use crate::Database;

    fn fields() -> CardFields {
        CardFields {
            name: "Lydia".into(),
            description: "Housecarl of Whiterun.".into(),
            persona: "Dutiful and dry.".into(),
            scenario: "Sworn to your service.".into(),
            first_message: "I am sworn to carry your burdens.".into(),
            example_messages: "{{user}}: Hello.\n{{char}}: My Thane.".into(),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_card_per_project() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();

        let first = db.upsert_character_card("p1", &fields()).await.unwrap();
        let mut changed = fields();
        changed.name = "Jordis".into();
        let second = db.upsert_character_card("p1", &changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Jordis");
    }

    #[tokio::test]
    async fn field_patch_touches_only_that_column() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        db.upsert_character_card("p1", &fields()).await.unwrap();

        let card = db
            .set_character_card_field("p1", CardField::Scenario, "A new adventure begins.")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(card.scenario, "A new adventure begins.");
        assert_eq!(card.name, "Lydia");
    }

    #[tokio::test]
    async fn patch_without_card_is_none() {
        let db = Database::new_in_memory().await.unwrap();
        db.create_project(&create_project_fixture("p1")).await.unwrap();
        let card = db
            .set_character_card_field("p1", CardField::Name, "x")
            .await
            .unwrap();
        assert!(card.is_none());
    }
}
