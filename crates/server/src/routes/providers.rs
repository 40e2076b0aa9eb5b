// crates/server/src/routes/providers.rs
//! Provider listing: every supported backend, whether a credential exists
//! for it, and its models when it does. Model listings are fetched
//! concurrently.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use lorecard_core::llm::{ModelInfo, ProviderConfig, ProviderRegistry};

use crate::error::ApiResult;
use crate::state::{AppState, CredentialSecrets};

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub configured: bool,
    pub models: Vec<ModelInfo>,
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ProviderInfo>>> {
    let credentials = state.db.list_credentials().await?;
    let formatter = state
        .db
        .get_global_template("json-formatter-prompt")
        .await?
        .map(|t| t.content);

    let fetches = ProviderRegistry::PROVIDER_IDS.iter().map(|id| {
        let credential = credentials.iter().find(|c| c.api_provider == *id);
        let state = Arc::clone(&state);
        let formatter = formatter.clone();
        async move {
            let Some(credential) = credential else {
                return ProviderInfo {
                    id: (*id).to_string(),
                    name: display_name(id),
                    configured: false,
                    models: Vec::new(),
                };
            };

            let secrets = state
                .cipher
                .decrypt(&credential.secrets)
                .ok()
                .and_then(|plain| serde_json::from_str::<CredentialSecrets>(&plain).ok());
            let models = match secrets {
                Some(secrets) => {
                    match ProviderRegistry::build(
                        id,
                        ProviderConfig {
                            api_key: secrets.api_key,
                            base_url: secrets.base_url,
                            json_formatter: formatter,
                        },
                    ) {
                        Ok(provider) => provider.list_models().await,
                        Err(e) => {
                            tracing::warn!(provider = *id, error = %e, "provider not buildable");
                            Vec::new()
                        }
                    }
                }
                None => Vec::new(),
            };

            ProviderInfo {
                id: (*id).to_string(),
                name: display_name(id),
                configured: true,
                models,
            }
        }
    });

    Ok(Json(futures::future::join_all(fetches).await))
}

fn display_name(id: &str) -> String {
    match id {
        "openrouter" => "OpenRouter".to_string(),
        "gemini" => "Gemini".to_string(),
        "deepseek" => "DeepSeek".to_string(),
        "openai_compatible" => "OpenAI-compatible".to_string(),
        other => other.to_string(),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/providers", get(list_providers))
}
