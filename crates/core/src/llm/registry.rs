// crates/core/src/llm/registry.rs
//! Provider registry: builds a backend from a provider id plus the decrypted
//! credential values attached to a project.

use std::sync::Arc;

use thiserror::Error;

use super::deepseek::DeepSeekProvider;
use super::gemini::GeminiProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::openrouter::OpenRouterProvider;
use super::provider::Provider;
use crate::template::JSON_FORMATTER_TEMPLATE;

/// Decrypted credential material for one provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Required for `openai_compatible`, ignored elsewhere.
    pub base_url: Option<String>,
    /// Formatter prompt override for prompt-engineered JSON backends.
    /// Falls back to the built-in template.
    pub json_formatter: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),

    #[error("provider '{0}' requires an API key")]
    MissingApiKey(String),

    #[error("provider '{0}' requires a base URL")]
    MissingBaseUrl(String),
}

/// The set of supported backends.
pub struct ProviderRegistry;

impl ProviderRegistry {
    pub const PROVIDER_IDS: &'static [&'static str] =
        &["openrouter", "gemini", "deepseek", "openai_compatible"];

    /// Instantiate the named backend from credential material.
    pub fn build(name: &str, config: ProviderConfig) -> Result<Arc<dyn Provider>, RegistryError> {
        let require_key = |value: &str| -> Result<String, RegistryError> {
            if value.is_empty() {
                Err(RegistryError::MissingApiKey(name.to_string()))
            } else {
                Ok(value.to_string())
            }
        };

        match name {
            "openrouter" => Ok(Arc::new(OpenRouterProvider::new(require_key(
                &config.api_key,
            )?))),
            "gemini" => Ok(Arc::new(GeminiProvider::new(require_key(&config.api_key)?))),
            "deepseek" => {
                let formatter = config
                    .json_formatter
                    .unwrap_or_else(|| JSON_FORMATTER_TEMPLATE.to_string());
                Ok(Arc::new(DeepSeekProvider::new(config.api_key, formatter)))
            }
            "openai_compatible" => {
                let base_url = config
                    .base_url
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| RegistryError::MissingBaseUrl(name.to_string()))?;
                Ok(Arc::new(OpenAiCompatProvider::new(config.api_key, base_url)))
            }
            other => Err(RegistryError::UnknownProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_registered_provider() {
        for id in ProviderRegistry::PROVIDER_IDS {
            let config = ProviderConfig {
                api_key: "key".into(),
                base_url: Some("http://localhost:1234/v1".into()),
                json_formatter: None,
            };
            let provider = ProviderRegistry::build(id, config).unwrap();
            assert_eq!(provider.name(), *id);
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let err = ProviderRegistry::build("anthropic", ProviderConfig::default()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownProvider(_)));
    }

    #[test]
    fn openai_compatible_requires_base_url() {
        let config = ProviderConfig {
            api_key: "key".into(),
            base_url: None,
            json_formatter: None,
        };
        let err = ProviderRegistry::build("openai_compatible", config).unwrap_err();
        assert!(matches!(err, RegistryError::MissingBaseUrl(_)));
    }
}
