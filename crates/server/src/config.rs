// crates/server/src/config.rs
//! Environment-driven configuration, read once at startup.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SQLite database path, from `DATABASE_URL` (a bare path or a
    /// `sqlite:` URL). Defaults to `lorecard.db` in the working directory.
    pub database_path: PathBuf,
    /// Passphrase for credential encryption. Required.
    pub secret_key: String,
    pub port: u16,
    pub app_env: AppEnv,
    pub app_version: String,
    pub runtime_env: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_SECRET_KEY is not set; it is required for encrypting credentials")]
    MissingSecretKey,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = std::env::var("APP_SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecretKey)?;

        let database_path = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|url| PathBuf::from(url.trim_start_matches("sqlite://").trim_start_matches("sqlite:")))
            .unwrap_or_else(|| PathBuf::from("lorecard.db"));

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let app_env = match std::env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            _ => AppEnv::Development,
        };

        Ok(Self {
            database_path,
            secret_key,
            port,
            app_env,
            app_version: std::env::var("APP_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            runtime_env: std::env::var("RUNTIME_ENV").unwrap_or_else(|_| "local".to_string()),
        })
    }
}
