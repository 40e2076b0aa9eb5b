// crates/server/src/routes/cards.rs
//! Character card read/delete plus the PNG export.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use lorecard_core::card_png::{export_card_png, CardExport};
use lorecard_db::types::CharacterCard;

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

async fn get_card(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SingleResponse<CharacterCard>>> {
    let card = state
        .db
        .get_character_card(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("CharacterCard for project '{project_id}'")))?;
    Ok(Json(SingleResponse::new(card)))
}

async fn delete_card(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_character_card(&project_id).await? {
        return Err(ApiError::NotFound(format!(
            "CharacterCard for project '{project_id}'"
        )));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// GET /api/projects/{id}/character-card/png - a chara_card_v2 PNG whose
/// `chara` tEXt chunk carries the card JSON.
async fn export_png(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let card = state
        .db
        .get_character_card(&project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("CharacterCard for project '{project_id}'")))?;

    let png = export_card_png(&CardExport {
        name: card.name.clone(),
        description: card.description,
        personality: card.persona,
        scenario: card.scenario,
        first_mes: card.first_message,
        mes_example: card.example_messages,
    });

    let filename = if card.name.is_empty() {
        "character.png".to_string()
    } else {
        format!("{}.png", card.name.replace(['/', '\\'], "_"))
    };
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        png,
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects/{project_id}/character-card",
            get(get_card).delete(delete_card),
        )
        .route("/projects/{project_id}/character-card/png", get(export_png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lorecard_core::card_png::extract_text_chunk;
    use lorecard_db::types::{CardFields, CreateProject, ProjectKind};
    use tower::ServiceExt;

    #[tokio::test]
    async fn png_export_embeds_the_card() {
        let state = test_state().await;
        state
            .db
            .create_project(&CreateProject {
                id: "p1".into(),
                name: "p1".into(),
                prompt: None,
                kind: ProjectKind::Character,
                templates: serde_json::from_str("{}").unwrap(),
                credential_id: None,
                api_provider: "openrouter".into(),
                model_name: "m".into(),
                model_parameters: serde_json::json!({}),
                requests_per_minute: 15,
            })
            .await
            .unwrap();
        state
            .db
            .upsert_character_card(
                "p1",
                &CardFields {
                    name: "Lydia".into(),
                    description: "Housecarl.".into(),
                    persona: "Dutiful.".into(),
                    scenario: "Whiterun.".into(),
                    first_message: "My Thane.".into(),
                    example_messages: "{{user}}: hi".into(),
                },
            )
            .await
            .unwrap();

        let app = router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/projects/p1/character-card/png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/png"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload = extract_text_chunk(&bytes, "chara").expect("chara chunk");
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["spec"], "chara_card_v2");
        assert_eq!(json["data"]["name"], "Lydia");
        assert_eq!(json["data"]["personality"], "Dutiful.");
    }
}
