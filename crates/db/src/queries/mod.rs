// crates/db/src/queries/mod.rs
//! Per-entity query modules plus shared row-marshalling helpers.
//!
//! Marshalling conventions: structured columns are JSON text, UUIDs are
//! canonical strings, booleans are 0/1, timestamps are RFC 3339 UTC text.

pub mod analytics;
pub mod cards;
pub mod credentials;
pub mod entries;
pub mod jobs;
pub mod links;
pub mod logs;
pub mod projects;
pub mod sources;
pub mod templates;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Paginated listing envelope shared by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub current_page: i64,
    pub per_page: i64,
    pub total_items: i64,
}

impl PaginationMeta {
    pub fn new(limit: i64, offset: i64, total_items: i64) -> Self {
        Self {
            current_page: offset / limit.max(1) + 1,
            per_page: limit,
            total_items,
        }
    }
}

/// Fixed-width RFC 3339 so lexicographic ordering of timestamp columns
/// matches chronological ordering (the claim query relies on this).
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &str, value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp in {column}: {e}")))
}

pub(crate) fn parse_opt_ts(column: &str, value: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    value.as_deref().map(|v| parse_ts(column, v)).transpose()
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> DbResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| DbError::Corrupt(format!("bad uuid in {column}: {e}")))
}

pub(crate) fn parse_opt_uuid(column: &str, value: Option<String>) -> DbResult<Option<Uuid>> {
    value.as_deref().map(|v| parse_uuid(column, v)).transpose()
}

/// Parse an optional JSON column into `Option<T>`; SQL NULL maps to `None`.
pub(crate) fn parse_opt_json<T: serde::de::DeserializeOwned>(
    value: Option<String>,
) -> DbResult<Option<T>> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(DbError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_meta_counts_pages_from_offset() {
        let meta = PaginationMeta::new(50, 0, 120);
        assert_eq!(meta.current_page, 1);
        let meta = PaginationMeta::new(50, 100, 120);
        assert_eq!(meta.current_page, 3);
    }

    #[test]
    fn timestamps_round_trip() {
        let now = now_rfc3339();
        parse_ts("created_at", &now).unwrap();
        assert!(parse_ts("created_at", "not a time").is_err());
    }
}
