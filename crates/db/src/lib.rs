// crates/db/src/lib.rs
// SQLite storage layer for lorecard: entities, migrations, and the atomic
// job-claim primitive the worker pool is built on.

mod migrations;
mod queries;
pub mod types;

pub use queries::analytics::ProjectAnalytics;
pub use queries::{PaginationMeta, Paginated};

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
        };
        db.run_migrations().await?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// Uses `shared_cache(true)` so all pool connections share the same
    /// in-memory database; without it each connection would get a private
    /// empty database.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin an explicit transaction. Callers that need multi-entity
    /// atomicity beyond the batch helpers can scope their own; nested
    /// `begin` calls become savepoints.
    pub async fn begin(&self) -> DbResult<sqlx::Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run all pending inline migrations.
    ///
    /// Ordered numeric versions tracked in `schema_migrations`, so
    /// non-idempotent statements are applied exactly once.
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1;
            if version <= current_version {
                continue;
            }
            sqlx::raw_sql(migration).execute(&self.pool).await?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
                .bind(version as i64)
                .bind(queries::now_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::debug!(version, "applied migration");
        }
        Ok(())
    }

    /// Startup recovery: no worker outlives the process, so any work still
    /// marked in-flight belongs to a previous run and goes back to pending.
    pub async fn recover_stale_work(&self) -> DbResult<(u64, u64)> {
        let jobs = sqlx::query(
            "UPDATE background_jobs SET status = 'pending', updated_at = ?1
             WHERE status = 'in_progress'",
        )
        .bind(queries::now_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let links =
            sqlx::query("UPDATE links SET status = 'pending' WHERE status = 'processing'")
                .execute(&self.pool)
                .await?
                .rows_affected();

        if jobs > 0 || links > 0 {
            info!(jobs, links, "reset stale in-flight work to pending");
        }
        Ok((jobs, links))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_run_and_are_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let (version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(version as usize, migrations::MIGRATIONS.len());
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_database() {
        let db = Database::new_in_memory().await.unwrap();
        db.ping().await.unwrap();
    }
}
