// crates/db/src/migrations.rs
/// Inline SQL migrations for the lorecard schema.
///
/// Simple inline migrations rather than sqlx migration files: the schema is
/// small and self-contained, and inlining keeps the binary deployable as a
/// single artifact. Each entry is applied once, in order, tracked by the
/// `schema_migrations` table.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: credentials (encrypted provider secrets)
    r#"
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    api_provider TEXT NOT NULL,
    secrets TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    // Migration 2: projects
    r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    prompt TEXT,
    kind TEXT NOT NULL DEFAULT 'lorebook',
    templates TEXT NOT NULL,
    credential_id TEXT REFERENCES credentials(id) ON DELETE SET NULL,
    api_provider TEXT NOT NULL,
    model_name TEXT NOT NULL,
    model_parameters TEXT NOT NULL DEFAULT '{}',
    requests_per_minute INTEGER NOT NULL DEFAULT 15,
    search_params TEXT,
    status TEXT NOT NULL DEFAULT 'draft',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    // Migration 3: project sources
    r#"
CREATE TABLE IF NOT EXISTS project_sources (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    kind TEXT NOT NULL DEFAULT 'web_url',
    url TEXT NOT NULL,
    raw_content TEXT,
    content_selectors TEXT,
    category_selectors TEXT,
    pagination_selector TEXT,
    url_exclusion_patterns TEXT,
    max_pages_to_crawl INTEGER NOT NULL DEFAULT 20,
    max_crawl_depth INTEGER NOT NULL DEFAULT 1,
    last_crawled_at TEXT,
    content_type TEXT,
    content_char_count INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_project_url ON project_sources(project_id, url);"#,
    // Migration 4: source hierarchy (category-crawl parent->child edges)
    r#"
CREATE TABLE IF NOT EXISTS project_source_hierarchy (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    parent_source_id TEXT NOT NULL REFERENCES project_sources(id) ON DELETE CASCADE,
    child_source_id TEXT NOT NULL REFERENCES project_sources(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_hierarchy_edge ON project_source_hierarchy(parent_source_id, child_source_id);"#,
    // Migration 5: lorebook entries
    r#"
CREATE TABLE IF NOT EXISTS lorebook_entries (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    source_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_entries_project ON lorebook_entries(project_id);"#,
    // Migration 6: links (one content URL per project)
    r#"
CREATE TABLE IF NOT EXISTS links (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    skip_reason TEXT,
    lorebook_entry_id TEXT REFERENCES lorebook_entries(id) ON DELETE SET NULL,
    raw_content TEXT,
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_links_project_url ON links(project_id, url);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_links_project_status ON links(project_id, status);"#,
    // Migration 7: character cards (at most one per project)
    r#"
CREATE TABLE IF NOT EXISTS character_cards (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL UNIQUE REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    persona TEXT NOT NULL DEFAULT '',
    scenario TEXT NOT NULL DEFAULT '',
    first_message TEXT NOT NULL DEFAULT '',
    example_messages TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    // Migration 8: source content versions (backups before AI edits)
    r#"
CREATE TABLE IF NOT EXISTS source_content_versions (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES project_sources(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_versions_source ON source_content_versions(source_id);"#,
    // Migration 9: background jobs
    r#"
CREATE TABLE IF NOT EXISTS background_jobs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    task_kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    payload TEXT,
    result TEXT,
    error_message TEXT,
    total_items INTEGER,
    processed_items INTEGER,
    progress REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON background_jobs(status, created_at);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_project ON background_jobs(project_id);"#,
    // Migration 10: api request logs (one row per LLM call, success or not)
    r#"
CREATE TABLE IF NOT EXISTS api_request_logs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    job_id TEXT,
    api_provider TEXT NOT NULL,
    model_name TEXT NOT NULL,
    request TEXT NOT NULL,
    response TEXT,
    input_tokens INTEGER,
    output_tokens INTEGER,
    calculated_cost REAL,
    latency_ms INTEGER NOT NULL DEFAULT 0,
    error INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_logs_project ON api_request_logs(project_id);"#,
    // Migration 11: global templates (process-wide prompt fragments)
    r#"
CREATE TABLE IF NOT EXISTS global_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
];
