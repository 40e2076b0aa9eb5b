// crates/server/tests/worker_flow.rs
//! End-to-end worker tests: enqueue -> claim -> handler against an
//! in-memory database and a wiremock-backed OpenAI-compatible provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lorecard_db::types::{
    ConfirmLinksPayload, CreateProject, JobPayload, JobStatus, ProjectKind, ProjectStatus,
    ProjectTemplates, UpdateLink,
};
use lorecard_db::Database;
use lorecard_server::config::{AppEnv, ServerConfig};
use lorecard_server::{jobs, AppState};

fn test_config() -> ServerConfig {
    ServerConfig {
        database_path: PathBuf::new(),
        secret_key: "integration-test-secret".into(),
        port: 0,
        app_env: AppEnv::Development,
        app_version: "test".into(),
        runtime_env: "test".into(),
    }
}

fn templates() -> ProjectTemplates {
    ProjectTemplates {
        search_params_generation: "--- role: user\nDerive search params for: {{ project.prompt }}"
            .into(),
        selector_generation: "--- role: user\n{{ content }}".into(),
        entry_creation: "--- role: system\nCriteria: {{ project.search_params.criteria }}\n--- role: user\n{{ content }}".into(),
        character_generation: "--- role: user\n{{ content }}".into(),
        character_field_regeneration: "--- role: user\nRewrite {{ field_to_regenerate }}".into(),
    }
}

/// Build a state whose provider calls land on the mock server.
async fn state_with_provider(server: &MockServer, project_id: &str, rpm: i64) -> Arc<AppState> {
    let db = Database::new_in_memory().await.unwrap();
    let state = AppState::new(test_config(), db);

    let secrets = json!({ "api_key": "test-key", "base_url": format!("{}/v1", server.uri()) });
    let encrypted = state.cipher.encrypt(&secrets.to_string()).unwrap();
    let credential = state
        .db
        .create_credential("test", "openai_compatible", &encrypted)
        .await
        .unwrap();

    state
        .db
        .create_project(&CreateProject {
            id: project_id.into(),
            name: format!("{project_id} project"),
            prompt: Some("Skyrim locations".into()),
            kind: ProjectKind::Lorebook,
            templates: templates(),
            credential_id: Some(credential.id),
            api_provider: "openai_compatible".into(),
            model_name: "local-model".into(),
            model_parameters: json!({}),
            requests_per_minute: rpm,
        })
        .await
        .unwrap();

    // Most stages render templates that reach into search_params.
    state
        .db
        .update_project(
            project_id,
            &lorecard_db::types::UpdateProject {
                search_params: Some(lorecard_db::types::SearchParams {
                    purpose: "Gather detailed location articles.".into(),
                    extraction_notes: "Name, hold, inhabitants, history.".into(),
                    criteria: "Dedicated location articles only.".into(),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    state
}

fn completion(content: serde_json::Value) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [{ "message": { "content": content.to_string() } }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 40, "total_tokens": 140 }
    })
}

async fn wait_for_job(state: &AppState, job_id: Uuid, timeout: Duration) -> JobStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = state
            .db
            .get_job_status(job_id)
            .await
            .unwrap()
            .expect("job exists");
        if status.is_terminal() {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} still {status} after {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn search_params_happy_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!({
            "purpose": "Gather detailed location articles.",
            "extraction_notes": "Name, hold, inhabitants, history.",
            "criteria": "Dedicated location articles only."
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let state = state_with_provider(&server, "skyrim", 60).await;
    let job = state
        .db
        .create_background_job("skyrim", &JobPayload::GenerateSearchParams)
        .await
        .unwrap();

    let worker = tokio::spawn(jobs::run_worker(Arc::clone(&state)));
    let status = wait_for_job(&state, job.id, Duration::from_secs(10)).await;
    worker.abort();

    assert_eq!(status, JobStatus::Completed);

    let project = state.db.get_project("skyrim").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::SearchParamsGenerated);
    let params = project.search_params.expect("search params stored");
    assert!(!params.purpose.is_empty());
    assert!(!params.extraction_notes.is_empty());
    assert!(!params.criteria.is_empty());

    let logs = state.db.list_api_request_logs("skyrim", 10, 0).await.unwrap();
    assert_eq!(logs.meta.total_items, 1);
    assert!(!logs.data[0].error);
}

#[tokio::test]
async fn confirm_then_process_creates_entries_and_audit_logs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!({
            "valid": true,
            "reason": null,
            "entry": {
                "title": "Whiterun",
                "content": "A city at the center of Skyrim, seat of Dragonsreach.",
                "keywords": ["Whiterun", "Dragonsreach"]
            }
        }))))
        .expect(3)
        .mount(&server)
        .await;

    let state = state_with_provider(&server, "skyrim", 600).await;
    let urls: Vec<String> = (1..=3)
        .map(|i| format!("https://wiki.test/Location_{i}"))
        .collect();

    let worker = tokio::spawn(jobs::run_worker(Arc::clone(&state)));

    let confirm = state
        .db
        .create_background_job(
            "skyrim",
            &JobPayload::ConfirmLinks(ConfirmLinksPayload { urls: urls.clone() }),
        )
        .await
        .unwrap();
    assert_eq!(
        wait_for_job(&state, confirm.id, Duration::from_secs(10)).await,
        JobStatus::Completed
    );

    // Idempotence: confirming the same set again changes nothing.
    let confirm_again = state
        .db
        .create_background_job(
            "skyrim",
            &JobPayload::ConfirmLinks(ConfirmLinksPayload { urls: urls.clone() }),
        )
        .await
        .unwrap();
    assert_eq!(
        wait_for_job(&state, confirm_again.id, Duration::from_secs(10)).await,
        JobStatus::Completed
    );
    let links = state.db.list_links_for_project("skyrim").await.unwrap();
    assert_eq!(links.len(), 3);

    // Cache content on the links so processing skips the scraper.
    for link in &links {
        state
            .db
            .update_link(
                link.id,
                &UpdateLink {
                    raw_content: Some("# Cached article content".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let process = state
        .db
        .create_background_job("skyrim", &JobPayload::ProcessProjectEntries)
        .await
        .unwrap();
    assert_eq!(
        wait_for_job(&state, process.id, Duration::from_secs(15)).await,
        JobStatus::Completed
    );
    worker.abort();

    let project = state.db.get_project("skyrim").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(state.db.count_entries_for_project("skyrim").await.unwrap(), 3);
    // One confirm job produced no LLM calls; processing produced three.
    assert_eq!(state.db.count_api_request_logs("skyrim").await.unwrap(), 3);

    let job = state.db.get_background_job(process.id).await.unwrap().unwrap();
    match job.result.unwrap() {
        lorecard_db::types::JobResult::ProcessEntries(result) => {
            assert_eq!(result.entries_created, 3);
            assert_eq!(result.entries_skipped, 0);
            assert_eq!(result.entries_failed, 0);
        }
        other => panic!("unexpected result variant: {other:?}"),
    }
}

#[tokio::test]
async fn empty_pending_set_completes_with_zero_counts() {
    let server = MockServer::start().await;
    let state = state_with_provider(&server, "empty", 60).await;

    let job = state
        .db
        .create_background_job("empty", &JobPayload::ProcessProjectEntries)
        .await
        .unwrap();

    let worker = tokio::spawn(jobs::run_worker(Arc::clone(&state)));
    assert_eq!(
        wait_for_job(&state, job.id, Duration::from_secs(10)).await,
        JobStatus::Completed
    );
    worker.abort();

    let project = state.db.get_project("empty").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(state.db.count_api_request_logs("empty").await.unwrap(), 0);
}

#[tokio::test]
async fn process_entries_jobs_respect_the_per_kind_cap() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(json!({
                    "valid": false,
                    "reason": "list page",
                    "entry": null
                })))
                .set_delay(Duration::from_millis(1200)),
        )
        .mount(&server)
        .await;

    let state = state_with_provider(&server, "p1", 600).await;

    // Two runnable process jobs, each with one cached link.
    let links = state
        .db
        .create_links("p1", &["https://wiki.test/A".into(), "https://wiki.test/B".into()])
        .await
        .unwrap();
    for link in &links {
        state
            .db
            .update_link(
                link.id,
                &UpdateLink {
                    raw_content: Some("content".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    let first = state
        .db
        .create_background_job("p1", &JobPayload::ProcessProjectEntries)
        .await
        .unwrap();
    let second = state
        .db
        .create_background_job("p1", &JobPayload::ProcessProjectEntries)
        .await
        .unwrap();

    let worker = tokio::spawn(jobs::run_worker(Arc::clone(&state)));

    // While the first runs (slow provider), the second must not be claimed.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let in_progress = state
        .db
        .count_in_progress_jobs_by_kind(lorecard_db::types::TaskKind::ProcessProjectEntries)
        .await
        .unwrap();
    assert_eq!(in_progress, 1, "per-kind cap must hold");
    assert_eq!(
        state.db.get_job_status(second.id).await.unwrap().unwrap(),
        JobStatus::Pending
    );

    assert_eq!(
        wait_for_job(&state, first.id, Duration::from_secs(20)).await,
        JobStatus::Completed
    );
    assert_eq!(
        wait_for_job(&state, second.id, Duration::from_secs(20)).await,
        JobStatus::Completed
    );
    worker.abort();
}

#[tokio::test]
async fn cancellation_reverts_processing_links_and_ends_canceled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(json!({
                    "valid": false,
                    "reason": "cancelled run",
                    "entry": null
                })))
                .set_delay(Duration::from_millis(900)),
        )
        .mount(&server)
        .await;

    let state = state_with_provider(&server, "p1", 6000).await;
    // Enough links that the run outlasts the 5s cancellation-poll interval.
    let urls: Vec<String> = (0..80).map(|i| format!("https://wiki.test/L{i}")).collect();
    let links = state.db.create_links("p1", &urls).await.unwrap();
    for link in &links {
        state
            .db
            .update_link(
                link.id,
                &UpdateLink {
                    raw_content: Some("content".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let job = state
        .db
        .create_background_job("p1", &JobPayload::ProcessProjectEntries)
        .await
        .unwrap();
    let worker = tokio::spawn(jobs::run_worker(Arc::clone(&state)));

    // Wait until the worker has actually claimed the job, then request
    // cancellation the way the API does.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = state.db.get_job_status(job.id).await.unwrap().unwrap();
        if status == JobStatus::InProgress {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never claimed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    state
        .db
        .update_background_job(
            job.id,
            &lorecard_db::types::UpdateBackgroundJob {
                status: Some(JobStatus::Cancelling),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let status = wait_for_job(&state, job.id, Duration::from_secs(30)).await;
    worker.abort();
    assert_eq!(status, JobStatus::Canceled);

    // Nothing may be left mid-flight.
    let counts = state.db.link_status_counts("p1").await.unwrap();
    let processing = counts
        .iter()
        .find(|(s, _)| *s == lorecard_db::types::LinkStatus::Processing)
        .map(|(_, c)| *c)
        .unwrap_or(0);
    assert_eq!(processing, 0, "processing links must revert on cancel");
}
