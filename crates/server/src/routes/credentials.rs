// crates/server/src/routes/credentials.rs
//! Credential CRUD. Secret values are encrypted before they hit the
//! database and never leave through this surface; reads return metadata
//! only.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use lorecard_db::types::Credential;

use crate::error::{ApiError, ApiResult, SingleResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateCredentialBody {
    name: String,
    api_provider: String,
    /// Key/value secret bundle, e.g. `{"api_key": "...", "base_url": "..."}`.
    secrets: Value,
}

#[derive(Debug, Deserialize)]
struct UpdateCredentialBody {
    name: Option<String>,
    secrets: Option<Value>,
}

/// Redacted read model: everything but the ciphertext.
#[derive(Debug, Serialize)]
struct CredentialView {
    id: Uuid,
    name: String,
    api_provider: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Credential> for CredentialView {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            name: credential.name,
            api_provider: credential.api_provider,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

async fn create_credential(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCredentialBody>,
) -> ApiResult<Json<SingleResponse<CredentialView>>> {
    if body.name.trim().is_empty() || body.api_provider.trim().is_empty() {
        return Err(ApiError::Validation(
            "name and api_provider are required".into(),
        ));
    }
    if !body.secrets.is_object() {
        return Err(ApiError::Validation("secrets must be an object".into()));
    }

    let plaintext = serde_json::to_string(&body.secrets)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let encrypted = state
        .cipher
        .encrypt(&plaintext)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let credential = state
        .db
        .create_credential(&body.name, &body.api_provider, &encrypted)
        .await?;
    Ok(Json(SingleResponse::new(credential.into())))
}

async fn list_credentials(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<CredentialView>>> {
    let credentials = state.db.list_credentials().await?;
    Ok(Json(credentials.into_iter().map(Into::into).collect()))
}

async fn get_credential(
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
) -> ApiResult<Json<SingleResponse<CredentialView>>> {
    let credential = state
        .db
        .get_credential(credential_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Credential '{credential_id}'")))?;
    Ok(Json(SingleResponse::new(credential.into())))
}

async fn update_credential(
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
    Json(body): Json<UpdateCredentialBody>,
) -> ApiResult<Json<SingleResponse<CredentialView>>> {
    let encrypted = match &body.secrets {
        Some(secrets) => {
            if !secrets.is_object() {
                return Err(ApiError::Validation("secrets must be an object".into()));
            }
            let plaintext =
                serde_json::to_string(secrets).map_err(|e| ApiError::Validation(e.to_string()))?;
            Some(
                state
                    .cipher
                    .encrypt(&plaintext)
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            )
        }
        None => None,
    };

    let credential = state
        .db
        .update_credential(credential_id, body.name.as_deref(), encrypted.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Credential '{credential_id}'")))?;
    Ok(Json(SingleResponse::new(credential.into())))
}

async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    if !state.db.delete_credential(credential_id).await? {
        return Err(ApiError::NotFound(format!("Credential '{credential_id}'")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credentials", post(create_credential).get(list_credentials))
        .route(
            "/credentials/{credential_id}",
            get(get_credential)
                .patch(update_credential)
                .delete(delete_credential),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn created_credential_is_encrypted_at_rest_and_redacted_on_read() {
        let state = test_state().await;
        let app = router().with_state(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/credentials")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"or","api_provider":"openrouter","secrets":{"api_key":"sk-test"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["data"].get("secrets").is_none());

        // The stored row holds ciphertext, not the key.
        let stored = &state.db.list_credentials().await.unwrap()[0];
        assert!(!stored.secrets.contains("sk-test"));
        let decrypted = state.cipher.decrypt(&stored.secrets).unwrap();
        assert!(decrypted.contains("sk-test"));
    }
}
