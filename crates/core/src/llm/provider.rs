// crates/core/src/llm/provider.rs
//! Provider trait defining the interface every LLM backend implements.

use async_trait::async_trait;

use super::types::{ChatOutcome, ChatRequest, ModelInfo};

/// A chat-completion backend.
///
/// Implementations: `OpenRouterProvider`, `GeminiProvider`,
/// `DeepSeekProvider`, `OpenAiCompatProvider`.
#[async_trait]
pub trait Provider: std::fmt::Debug + Send + Sync {
    /// Run one completion. Both arms of the outcome carry the raw
    /// request/response snapshots and latency so the caller can write
    /// exactly one audit-log row per call.
    async fn generate(&self, request: ChatRequest) -> ChatOutcome;

    /// List the models this backend exposes. Backends without a listing
    /// endpoint return a static set; listing failures return an empty vec.
    async fn list_models(&self) -> Vec<ModelInfo>;

    /// Stable provider id for logging and registry lookup (e.g. "openrouter").
    fn name(&self) -> &str;
}
