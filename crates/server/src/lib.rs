// crates/server/src/lib.rs
//! lorecard server: HTTP surface, SSE fan-out, and the background worker
//! that drives the crawl/summarize pipeline.

pub mod config;
pub mod crypto;
pub mod default_templates;
pub mod error;
pub mod events;
pub mod jobs;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
