// crates/server/src/pipeline/discover.rs
//! Recursive discover-and-crawl, and its LLM-free rescan twin.
//!
//! A BFS over (source, depth) tuples. Each source gets one LLM call to
//! derive selector families from its first page (discovery only), a
//! pagination walk bounded by `max_pages_to_crawl`, and - on the first page
//! only, so category expansion does not multiply with pagination - category
//! classification that creates child sources and enqueues them one level
//! deeper. URLs matched by both a content and a category selector count as
//! content. No Link rows are written here: the URL buckets go back to the
//! user for curation before `confirm_links` persists anything.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use lorecard_core::llm::{Provider, ResponseSchema};
use lorecard_core::sanitize;
use lorecard_core::scrape::{FetchOptions, Scraper};
use lorecard_core::template;

use lorecard_db::types::{
    BackgroundJob, CreateProjectSource, DiscoverResult, JobPayload, JobResult, JobStatus, Project,
    ProjectSource, ProjectStatus, SourceKind, UpdateBackgroundJob, UpdateProjectSource,
};

use super::{
    build_request, generate_logged, parse_content, template_context, update_job, PipelineError,
    PipelineResult,
};
use crate::jobs::CancelFlag;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SelectorResponse {
    content_selectors: Vec<String>,
    #[serde(default)]
    category_selectors: Vec<String>,
    #[serde(default)]
    pagination_selector: Option<String>,
}

fn selector_schema() -> ResponseSchema {
    ResponseSchema::new(
        "selector_response",
        json!({
            "type": "object",
            "properties": {
                "content_selectors": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "CSS selectors targeting links to final content pages."
                },
                "category_selectors": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "CSS selectors for links leading to further list or category pages."
                },
                "pagination_selector": {
                    "type": ["string", "null"],
                    "description": "A single CSS selector for the next-page link, or null."
                }
            },
            "required": ["content_selectors", "category_selectors", "pagination_selector"]
        }),
    )
}

pub(super) async fn run(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
    use_llm: bool,
) -> PipelineResult<()> {
    let (JobPayload::DiscoverAndCrawlSources(payload) | JobPayload::RescanLinks(payload)) =
        &job.payload
    else {
        return Err(PipelineError::Invalid(
            "invalid payload for discovery job".into(),
        ));
    };

    if use_llm && project.search_params.is_none() {
        return Err(PipelineError::Invalid(
            "project must have search params before discovery".into(),
        ));
    }

    let provider = if use_llm {
        Some(state.provider_for_project(project).await?)
    } else {
        None
    };

    let cancel = CancelFlag::new();
    let poller = cancel.spawn_poller(state.db.clone(), job.id);
    let outcome = crawl_all(state, job, project, &payload.source_ids, provider, &cancel).await;
    poller.abort();

    match outcome? {
        Some(result) => {
            if use_llm && project.status == ProjectStatus::SearchParamsGenerated {
                state
                    .db
                    .set_project_status(&project.id, ProjectStatus::SelectorGenerated)
                    .await?;
            }
            update_job(
                state,
                &project.id,
                job.id,
                UpdateBackgroundJob {
                    status: Some(JobStatus::Completed),
                    result: Some(JobResult::Discover(result)),
                    ..Default::default()
                },
            )
            .await;
        }
        None => {
            tracing::info!(job_id = %job.id, "discovery cancelled");
            update_job(
                state,
                &project.id,
                job.id,
                UpdateBackgroundJob {
                    status: Some(JobStatus::Canceled),
                    ..Default::default()
                },
            )
            .await;
        }
    }
    Ok(())
}

/// The BFS itself. `Ok(None)` means cancellation was observed between
/// sources.
async fn crawl_all(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
    root_source_ids: &[Uuid],
    provider: Option<Arc<dyn Provider>>,
    cancel: &CancelFlag,
) -> PipelineResult<Option<DiscoverResult>> {
    let scraper = Scraper::new();

    let mut queue: VecDeque<(Uuid, i64)> = root_source_ids.iter().map(|id| (*id, 0)).collect();
    let mut enqueued: HashSet<Uuid> = root_source_ids.iter().copied().collect();
    let mut all_content_urls: BTreeSet<String> = BTreeSet::new();
    let mut new_sources_created = 0i64;
    let mut selectors_generated = 0i64;
    let mut total_sources = queue.len() as i64;
    let mut processed_sources = 0i64;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            total_items: Some(total_sources),
            processed_items: Some(0),
            progress: Some(0.0),
            ..Default::default()
        },
    )
    .await;

    while let Some((source_id, depth)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let Some(source) = state.db.get_project_source(source_id).await? else {
            tracing::warn!(job_id = %job.id, %source_id, "source not found, skipping");
            continue;
        };

        let source = match &provider {
            Some(provider) => {
                let derived =
                    derive_selectors(state, job, project, provider, &source, &scraper).await?;
                selectors_generated += 1;
                state
                    .db
                    .update_project_source(
                        source.id,
                        &UpdateProjectSource {
                            content_selectors: Some(derived.content_selectors),
                            category_selectors: Some(derived.category_selectors),
                            pagination_selector: Some(
                                derived.pagination_selector.unwrap_or_default(),
                            ),
                            ..Default::default()
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        PipelineError::Invalid(format!(
                            "failed to persist selectors for source {}",
                            source.id
                        ))
                    })?
            }
            None => {
                if source
                    .content_selectors
                    .as_ref()
                    .is_none_or(|s| s.is_empty())
                {
                    tracing::warn!(job_id = %job.id, source_id = %source.id, "source has no selectors, skipping rescan");
                    processed_sources += 1;
                    continue;
                }
                source
            }
        };

        let walk = walk_source(&scraper, &source).await;
        all_content_urls.extend(walk.content_urls.iter().cloned());

        // Category expansion: discovery only, first page only, and never past
        // the depth limit. Content precedence drops URLs both families matched.
        if provider.is_some() && depth < source.max_crawl_depth {
            for url in &walk.category_urls {
                if walk.content_urls.contains(url) {
                    continue;
                }
                let child = match state.db.get_source_by_url(&project.id, url).await? {
                    Some(existing) => existing,
                    None => {
                        new_sources_created += 1;
                        state
                            .db
                            .create_project_source(&CreateProjectSource {
                                project_id: project.id.clone(),
                                kind: SourceKind::WebUrl,
                                url: url.clone(),
                                raw_content: None,
                                url_exclusion_patterns: source.url_exclusion_patterns.clone(),
                                max_pages_to_crawl: source.max_pages_to_crawl,
                                max_crawl_depth: source.max_crawl_depth,
                            })
                            .await?
                    }
                };
                state
                    .db
                    .add_source_hierarchy_edge(&project.id, source.id, child.id)
                    .await?;
                if enqueued.insert(child.id) {
                    queue.push_back((child.id, depth + 1));
                    total_sources += 1;
                }
            }
        }

        state
            .db
            .update_project_source(
                source.id,
                &UpdateProjectSource {
                    last_crawled_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        processed_sources += 1;
        update_job(
            state,
            &project.id,
            job.id,
            UpdateBackgroundJob {
                total_items: Some(total_sources),
                processed_items: Some(processed_sources),
                progress: Some(processed_sources as f64 / total_sources.max(1) as f64 * 100.0),
                ..Default::default()
            },
        )
        .await;
    }

    let all_urls: Vec<String> = all_content_urls.into_iter().collect();
    let existing: BTreeSet<String> = state
        .db
        .existing_link_urls(&project.id, &all_urls)
        .await?
        .into_iter()
        .collect();
    let new_links: Vec<String> = all_urls
        .iter()
        .filter(|url| !existing.contains(*url))
        .cloned()
        .collect();

    Ok(Some(DiscoverResult {
        new_links,
        existing_links: existing.into_iter().collect(),
        new_sources_created,
        selectors_generated,
    }))
}

/// One LLM call on the source's first page to derive the selector families.
async fn derive_selectors(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
    provider: &Arc<dyn Provider>,
    source: &ProjectSource,
    scraper: &Scraper,
) -> PipelineResult<SelectorResponse> {
    tracing::info!(job_id = %job.id, source_id = %source.id, url = %source.url, "deriving selectors");
    let html = scraper
        .fetch(&source.url, FetchOptions::cleaned_pretty())
        .await?;

    let context = template_context(
        state,
        project,
        &[("content", json!(html)), ("source", json!(source))],
    )
    .await?;
    let messages = template::render_messages(&project.templates.selector_generation, &context)?;
    let request = build_request(project, messages, Some(selector_schema()));

    let response = generate_logged(state, project, job.id, provider, request).await?;
    parse_content(&response.content)
}

struct SourceWalk {
    content_urls: BTreeSet<String>,
    category_urls: Vec<String>,
}

/// Follow pagination from the source's first page, collecting content URLs
/// from every page and category URLs from the first page only. Stops on the
/// page budget, a missing/self/visited next link, or repeated page content.
async fn walk_source(scraper: &Scraper, source: &ProjectSource) -> SourceWalk {
    let content_selectors = source.content_selectors.clone().unwrap_or_default();
    let category_selectors = source.category_selectors.clone().unwrap_or_default();
    let exclusions = source.url_exclusion_patterns.clone().unwrap_or_default();

    let mut walk = SourceWalk {
        content_urls: BTreeSet::new(),
        category_urls: Vec::new(),
    };
    let mut current_url = source.url.clone();
    let mut visited_pages: HashSet<String> = HashSet::from([current_url.clone()]);
    let mut seen_digests: HashSet<[u8; 32]> = HashSet::new();
    let mut pages_crawled = 0i64;
    let mut first_page = true;

    while pages_crawled < source.max_pages_to_crawl {
        pages_crawled += 1;
        let html = match scraper.fetch(&current_url, FetchOptions::cleaned()).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(url = %current_url, error = %e, "page fetch failed, ending walk");
                break;
            }
        };

        let digest: [u8; 32] = Sha256::digest(html.as_bytes()).into();
        if !seen_digests.insert(digest) {
            tracing::info!(source_id = %source.id, "duplicate page content, ending walk");
            break;
        }

        for href in sanitize::extract_hrefs(&html, &content_selectors) {
            if let Some(url) = resolve_url(&current_url, &href) {
                if !is_excluded(&url, &exclusions) {
                    walk.content_urls.insert(url);
                }
            }
        }

        if first_page {
            let mut seen_categories = HashSet::new();
            for href in sanitize::extract_hrefs(&html, &category_selectors) {
                if let Some(url) = resolve_url(&current_url, &href) {
                    if !is_excluded(&url, &exclusions) && seen_categories.insert(url.clone()) {
                        walk.category_urls.push(url);
                    }
                }
            }
            first_page = false;
        }

        let Some(pagination) = source.pagination_selector.as_deref() else {
            break;
        };
        let Some(next) = sanitize::select_first_href(&html, pagination)
            .and_then(|href| resolve_url(&current_url, &href))
        else {
            break;
        };
        if next == current_url || !visited_pages.insert(next.clone()) {
            break;
        }
        current_url = next;
    }

    walk
}

fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let mut joined = base.join(href).ok()?;
    joined.set_fragment(None);
    Some(joined.to_string())
}

fn is_excluded(url: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && url.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_handles_relative_and_fragment_urls() {
        assert_eq!(
            resolve_url("https://example.test/wiki/Category:A", "/wiki/Whiterun").as_deref(),
            Some("https://example.test/wiki/Whiterun")
        );
        assert_eq!(
            resolve_url("https://example.test/a/b", "c#section").as_deref(),
            Some("https://example.test/a/c")
        );
        assert!(resolve_url("not a url", "x").is_none());
    }

    #[test]
    fn exclusion_patterns_are_substring_matches() {
        let patterns = vec!["/Talk:".to_string(), "action=edit".to_string()];
        assert!(is_excluded("https://example.test/Talk:Whiterun", &patterns));
        assert!(is_excluded("https://example.test/w?action=edit", &patterns));
        assert!(!is_excluded("https://example.test/wiki/Whiterun", &patterns));
        assert!(!is_excluded("https://example.test/x", &[String::new()]));
    }
}
