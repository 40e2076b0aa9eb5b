// crates/server/src/state.rs
//! Application state for the axum server: the service container that owns
//! all process-wide mutable state (subscriber registry, rate-limiter
//! windows, credential cipher). Constructed at startup, shared via `Arc`.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use thiserror::Error;

use lorecard_core::llm::{Provider, ProviderConfig, ProviderRegistry, RegistryError};
use lorecard_db::types::Project;
use lorecard_db::{Database, DbError};

use crate::config::ServerConfig;
use crate::crypto::CredentialCipher;
use crate::events::EventBroadcaster;
use crate::rate_limit::RateLimiter;

pub struct AppState {
    pub start_time: Instant,
    pub config: ServerConfig,
    pub db: Database,
    pub events: EventBroadcaster,
    pub rate_limiter: RateLimiter,
    pub cipher: CredentialCipher,
}

#[derive(Debug, Error)]
pub enum ProviderResolveError {
    #[error("project has no credential configured")]
    MissingCredential,

    #[error("credential not found")]
    CredentialNotFound,

    #[error("credential decryption failed")]
    Decrypt,

    #[error("credential secrets are not a valid JSON object")]
    BadSecrets,

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Decrypted shape of a credential's `secrets` bundle.
#[derive(Debug, Deserialize)]
pub struct CredentialSecrets {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Arc<Self> {
        let cipher = CredentialCipher::new(&config.secret_key);
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            db,
            events: EventBroadcaster::new(),
            rate_limiter: RateLimiter::new(),
            cipher,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build the LLM backend for a project from its credential.
    pub async fn provider_for_project(
        &self,
        project: &Project,
    ) -> Result<Arc<dyn Provider>, ProviderResolveError> {
        let credential_id = project
            .credential_id
            .ok_or(ProviderResolveError::MissingCredential)?;
        let credential = self
            .db
            .get_credential(credential_id)
            .await?
            .ok_or(ProviderResolveError::CredentialNotFound)?;

        let secrets = self
            .cipher
            .decrypt(&credential.secrets)
            .map_err(|_| ProviderResolveError::Decrypt)?;
        let secrets: CredentialSecrets =
            serde_json::from_str(&secrets).map_err(|_| ProviderResolveError::BadSecrets)?;

        // Operators may tune the formatter prompt via the global template.
        let json_formatter = self
            .db
            .get_global_template("json-formatter-prompt")
            .await?
            .map(|t| t.content);

        Ok(ProviderRegistry::build(
            &project.api_provider,
            ProviderConfig {
                api_key: secrets.api_key,
                base_url: secrets.base_url,
                json_formatter,
            },
        )?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::AppEnv;
    use std::path::PathBuf;

    pub async fn test_state() -> Arc<AppState> {
        let db = Database::new_in_memory().await.expect("in-memory db");
        let config = ServerConfig {
            database_path: PathBuf::new(),
            secret_key: "test-secret".into(),
            port: 0,
            app_env: AppEnv::Development,
            app_version: "test".into(),
            runtime_env: "test".into(),
        };
        AppState::new(config, db)
    }
}
