// crates/server/src/main.rs
//! lorecard server binary.
//!
//! Startup order matters: the database opens and migrates first, then stale
//! in-flight work from a previous run is reset, default templates are
//! seeded, and only then does the worker start claiming jobs. The HTTP
//! server binds last.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use lorecard_db::Database;
use lorecard_server::routes::create_app;
use lorecard_server::{config::AppEnv, jobs, AppState, ServerConfig};
use lorecard_server::default_templates::seed_default_templates;

fn init_tracing(app_env: &AppEnv) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match app_env {
        AppEnv::Production => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        AppEnv::Development => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    init_tracing(&config.app_env);

    tracing::info!(
        version = %config.app_version,
        runtime_env = %config.runtime_env,
        "starting lorecard v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Database::new(&config.database_path).await?;

    // No worker outlives the process: anything still marked in-flight is
    // stale and goes back to pending before the worker starts.
    let (stale_jobs, stale_links) = db.recover_stale_work().await?;
    if stale_jobs > 0 || stale_links > 0 {
        tracing::info!(stale_jobs, stale_links, "recovered stale work from previous run");
    }

    let seeded = seed_default_templates(&db).await?;
    if seeded > 0 {
        tracing::info!(seeded, "seeded default global templates");
    }

    let port = config.port;
    let state = AppState::new(config, db);

    let worker_state = Arc::clone(&state);
    let worker = tokio::spawn(async move {
        jobs::run_worker(worker_state).await;
    });

    let app = create_app(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
            worker.abort();
        })
        .await?;

    Ok(())
}
