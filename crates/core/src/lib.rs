// crates/core/src/lib.rs
//! Domain-independent building blocks for the lorecard pipeline:
//! the LLM provider abstraction, JSON-schema handling, pricing tables,
//! the web scraper, the prompt-template layer, and PNG card export.

pub mod card_png;
pub mod llm;
pub mod pricing;
pub mod sanitize;
pub mod scrape;
pub mod template;

pub use llm::{
    ChatError, ChatMessage, ChatOutcome, ChatRequest, ChatResponse, ModelInfo, Provider,
    ResponseSchema, Role, Usage,
};
