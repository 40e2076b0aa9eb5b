// crates/db/src/types.rs
//! Entity structs and status enums. Cross-entity navigation is by id only;
//! the pointer graph lives in the database, not in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::DbError;

macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Result<Self, DbError> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DbError::Corrupt(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum! {
    /// Project lifecycle. Transitions are monotone except the
    /// `processing <-> failed` retry loop.
    ProjectStatus {
        Draft => "draft",
        SearchParamsGenerated => "search_params_generated",
        SelectorGenerated => "selector_generated",
        LinksExtracted => "links_extracted",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

str_enum! {
    ProjectKind {
        Lorebook => "lorebook",
        Character => "character",
    }
}

str_enum! {
    SourceKind {
        WebUrl => "web_url",
        UserTextFile => "user_text_file",
        CharacterCard => "character_card",
    }
}

str_enum! {
    LinkStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

str_enum! {
    /// Job lifecycle: `pending -> in_progress -> (completed | failed |
    /// cancelling -> canceled)`.
    JobStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Cancelling => "cancelling",
        Canceled => "canceled",
        Completed => "completed",
        Failed => "failed",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

str_enum! {
    /// The queue's task kinds. Every kind runs at most one job at a time
    /// within a process.
    TaskKind {
        GenerateSearchParams => "generate_search_params",
        DiscoverAndCrawlSources => "discover_and_crawl_sources",
        RescanLinks => "rescan_links",
        ConfirmLinks => "confirm_links",
        ProcessProjectEntries => "process_project_entries",
        FetchSourceContent => "fetch_source_content",
        GenerateCharacterCard => "generate_character_card",
        RegenerateCharacterField => "regenerate_character_field",
        AiEditSourceContent => "ai_edit_source_content",
    }
}

str_enum! {
    /// Regenerable character-card fields.
    CardField {
        Name => "name",
        Description => "description",
        Persona => "persona",
        Scenario => "scenario",
        FirstMessage => "first_message",
        ExampleMessages => "example_messages",
    }
}

/// The five named prompt templates a project carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectTemplates {
    #[serde(default)]
    pub search_params_generation: String,
    #[serde(default)]
    pub selector_generation: String,
    #[serde(default)]
    pub entry_creation: String,
    #[serde(default)]
    pub character_generation: String,
    #[serde(default)]
    pub character_field_regeneration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub purpose: String,
    pub extraction_notes: String,
    pub criteria: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub prompt: Option<String>,
    pub kind: ProjectKind,
    pub templates: ProjectTemplates,
    pub credential_id: Option<Uuid>,
    pub api_provider: String,
    pub model_name: String,
    pub model_parameters: Value,
    pub requests_per_minute: i64,
    pub search_params: Option<SearchParams>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_project_kind")]
    pub kind: ProjectKind,
    pub templates: ProjectTemplates,
    #[serde(default)]
    pub credential_id: Option<Uuid>,
    pub api_provider: String,
    pub model_name: String,
    #[serde(default = "empty_object")]
    pub model_parameters: Value,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: i64,
}

fn default_project_kind() -> ProjectKind {
    ProjectKind::Lorebook
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_rpm() -> i64 {
    15
}

/// Patch-style update: `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub templates: Option<ProjectTemplates>,
    pub credential_id: Option<Uuid>,
    pub api_provider: Option<String>,
    pub model_name: Option<String>,
    pub model_parameters: Option<Value>,
    pub requests_per_minute: Option<i64>,
    pub search_params: Option<SearchParams>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSource {
    pub id: Uuid,
    pub project_id: String,
    pub kind: SourceKind,
    pub url: String,
    pub raw_content: Option<String>,
    pub content_selectors: Option<Vec<String>>,
    pub category_selectors: Option<Vec<String>>,
    pub pagination_selector: Option<String>,
    pub url_exclusion_patterns: Option<Vec<String>>,
    pub max_pages_to_crawl: i64,
    pub max_crawl_depth: i64,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub content_char_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectSource {
    pub project_id: String,
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub url_exclusion_patterns: Option<Vec<String>>,
    #[serde(default = "default_max_pages")]
    pub max_pages_to_crawl: i64,
    #[serde(default = "default_max_depth")]
    pub max_crawl_depth: i64,
}

fn default_source_kind() -> SourceKind {
    SourceKind::WebUrl
}

fn default_max_pages() -> i64 {
    20
}

fn default_max_depth() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectSource {
    pub url: Option<String>,
    pub raw_content: Option<String>,
    pub content_selectors: Option<Vec<String>>,
    pub category_selectors: Option<Vec<String>>,
    pub pagination_selector: Option<String>,
    pub url_exclusion_patterns: Option<Vec<String>>,
    pub max_pages_to_crawl: Option<i64>,
    pub max_crawl_depth: Option<i64>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub content_char_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceHierarchyEdge {
    pub id: Uuid,
    pub project_id: String,
    pub parent_source_id: Uuid,
    pub child_source_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceContentVersion {
    pub id: Uuid,
    pub source_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub id: Uuid,
    pub project_id: String,
    pub url: String,
    pub status: LinkStatus,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub lorebook_entry_id: Option<Uuid>,
    pub raw_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Patch-style link update used by the entry-processing write phase.
#[derive(Debug, Clone, Default)]
pub struct UpdateLink {
    pub status: Option<LinkStatus>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub lorebook_entry_id: Option<Uuid>,
    pub raw_content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LorebookEntry {
    pub id: Uuid,
    pub project_id: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLorebookEntry {
    pub project_id: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLorebookEntry {
    pub title: Option<String>,
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterCard {
    pub id: Uuid,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub persona: String,
    pub scenario: String,
    pub first_message: String,
    pub example_messages: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All six card fields; used for upserts and full regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardFields {
    pub name: String,
    pub description: String,
    pub persona: String,
    pub scenario: String,
    pub first_message: String,
    pub example_messages: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: Uuid,
    pub name: String,
    pub api_provider: String,
    /// Encrypted key/value bundle; never returned by the API as-is.
    pub secrets: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Background jobs -------------------------------------------------------

/// Typed payload, discriminated by `task_kind`. Persisted as the JSON body
/// of the matching variant and re-parsed on load.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    GenerateSearchParams,
    DiscoverAndCrawlSources(SourceIdsPayload),
    RescanLinks(SourceIdsPayload),
    ConfirmLinks(ConfirmLinksPayload),
    ProcessProjectEntries,
    FetchSourceContent(SourceIdsPayload),
    GenerateCharacterCard(SourceIdsPayload),
    RegenerateCharacterField(RegenerateFieldPayload),
    AiEditSourceContent(AiEditPayload),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceIdsPayload {
    pub source_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmLinksPayload {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateFieldPayload {
    pub field: CardField,
    /// Existing card fields to include as context.
    #[serde(default)]
    pub use_card_fields: Vec<CardField>,
    /// Sources whose raw content should be included as context.
    #[serde(default)]
    pub source_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEditPayload {
    pub source_id: Uuid,
    pub edit_instruction: String,
    #[serde(default)]
    pub include_full_context: bool,
}

impl JobPayload {
    pub fn task_kind(&self) -> TaskKind {
        match self {
            JobPayload::GenerateSearchParams => TaskKind::GenerateSearchParams,
            JobPayload::DiscoverAndCrawlSources(_) => TaskKind::DiscoverAndCrawlSources,
            JobPayload::RescanLinks(_) => TaskKind::RescanLinks,
            JobPayload::ConfirmLinks(_) => TaskKind::ConfirmLinks,
            JobPayload::ProcessProjectEntries => TaskKind::ProcessProjectEntries,
            JobPayload::FetchSourceContent(_) => TaskKind::FetchSourceContent,
            JobPayload::GenerateCharacterCard(_) => TaskKind::GenerateCharacterCard,
            JobPayload::RegenerateCharacterField(_) => TaskKind::RegenerateCharacterField,
            JobPayload::AiEditSourceContent(_) => TaskKind::AiEditSourceContent,
        }
    }

    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        let value = match self {
            JobPayload::GenerateSearchParams | JobPayload::ProcessProjectEntries => return Ok(None),
            JobPayload::DiscoverAndCrawlSources(p)
            | JobPayload::RescanLinks(p)
            | JobPayload::FetchSourceContent(p)
            | JobPayload::GenerateCharacterCard(p) => serde_json::to_string(p)?,
            JobPayload::ConfirmLinks(p) => serde_json::to_string(p)?,
            JobPayload::RegenerateCharacterField(p) => serde_json::to_string(p)?,
            JobPayload::AiEditSourceContent(p) => serde_json::to_string(p)?,
        };
        Ok(Some(value))
    }

    pub fn from_json(kind: TaskKind, json: Option<&str>) -> Result<Self, DbError> {
        let parse = |json: Option<&str>| -> Result<Value, DbError> {
            Ok(match json {
                Some(text) => serde_json::from_str(text)?,
                None => Value::Null,
            })
        };
        Ok(match kind {
            TaskKind::GenerateSearchParams => JobPayload::GenerateSearchParams,
            TaskKind::ProcessProjectEntries => JobPayload::ProcessProjectEntries,
            TaskKind::DiscoverAndCrawlSources => {
                JobPayload::DiscoverAndCrawlSources(serde_json::from_value(parse(json)?)?)
            }
            TaskKind::RescanLinks => JobPayload::RescanLinks(serde_json::from_value(parse(json)?)?),
            TaskKind::ConfirmLinks => {
                JobPayload::ConfirmLinks(serde_json::from_value(parse(json)?)?)
            }
            TaskKind::FetchSourceContent => {
                JobPayload::FetchSourceContent(serde_json::from_value(parse(json)?)?)
            }
            TaskKind::GenerateCharacterCard => {
                JobPayload::GenerateCharacterCard(serde_json::from_value(parse(json)?)?)
            }
            TaskKind::RegenerateCharacterField => {
                JobPayload::RegenerateCharacterField(serde_json::from_value(parse(json)?)?)
            }
            TaskKind::AiEditSourceContent => {
                JobPayload::AiEditSourceContent(serde_json::from_value(parse(json)?)?)
            }
        })
    }
}

/// Typed result, discriminated by `task_kind` like the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Discover(DiscoverResult),
    ConfirmLinks(ConfirmLinksResult),
    ProcessEntries(ProcessEntriesResult),
    FetchSourceContent(FetchSourceContentResult),
    GenerateCharacterCard(GenerateCardResult),
    RegenerateField(RegenerateFieldResult),
    AiEdit(AiEditResult),
    Empty(EmptyResult),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResult {
    pub new_links: Vec<String>,
    pub existing_links: Vec<String>,
    pub new_sources_created: i64,
    pub selectors_generated: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmLinksResult {
    pub links_saved: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntriesResult {
    pub entries_created: i64,
    pub entries_skipped: i64,
    pub entries_failed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchSourceContentResult {
    pub sources_fetched: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateCardResult {
    pub character_card_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateFieldResult {
    pub field: CardField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEditResult {
    pub source_id: Uuid,
    pub version_created: bool,
}

impl JobResult {
    pub fn from_json(kind: TaskKind, json: &str) -> Result<Self, DbError> {
        Ok(match kind {
            TaskKind::GenerateSearchParams => JobResult::Empty(serde_json::from_str(json)?),
            TaskKind::DiscoverAndCrawlSources | TaskKind::RescanLinks => {
                JobResult::Discover(serde_json::from_str(json)?)
            }
            TaskKind::ConfirmLinks => JobResult::ConfirmLinks(serde_json::from_str(json)?),
            TaskKind::ProcessProjectEntries => {
                JobResult::ProcessEntries(serde_json::from_str(json)?)
            }
            TaskKind::FetchSourceContent => {
                JobResult::FetchSourceContent(serde_json::from_str(json)?)
            }
            TaskKind::GenerateCharacterCard => {
                JobResult::GenerateCharacterCard(serde_json::from_str(json)?)
            }
            TaskKind::RegenerateCharacterField => {
                JobResult::RegenerateField(serde_json::from_str(json)?)
            }
            TaskKind::AiEditSourceContent => JobResult::AiEdit(serde_json::from_str(json)?),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundJob {
    pub id: Uuid,
    pub project_id: String,
    pub task_kind: TaskKind,
    pub status: JobStatus,
    #[serde(skip)]
    pub payload: JobPayload,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
    pub total_items: Option<i64>,
    pub processed_items: Option<i64>,
    pub progress: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patch-style job update used by handlers and the cancel endpoint.
#[derive(Debug, Clone, Default)]
pub struct UpdateBackgroundJob {
    pub status: Option<JobStatus>,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
    pub total_items: Option<i64>,
    pub processed_items: Option<i64>,
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiRequestLog {
    pub id: Uuid,
    pub project_id: String,
    pub job_id: Option<Uuid>,
    pub api_provider: String,
    pub model_name: String,
    pub request: Value,
    pub response: Option<Value>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub calculated_cost: Option<f64>,
    pub latency_ms: i64,
    pub error: bool,
    pub created_at: DateTime<Utc>,
}

/// One link's outcome from the concurrent I/O phase, queued for the batched
/// transactional write phase.
#[derive(Debug, Clone)]
pub enum LinkWrite {
    Success {
        link_id: Uuid,
        entry: CreateLorebookEntry,
        log: CreateApiRequestLog,
        raw_content: String,
    },
    Skipped {
        link_id: Uuid,
        reason: String,
        log: CreateApiRequestLog,
    },
    Failed {
        link_id: Uuid,
        error_message: String,
        log: Option<CreateApiRequestLog>,
    },
}

impl LinkWrite {
    pub fn link_id(&self) -> Uuid {
        match self {
            LinkWrite::Success { link_id, .. }
            | LinkWrite::Skipped { link_id, .. }
            | LinkWrite::Failed { link_id, .. } => *link_id,
        }
    }
}

/// What one committed batch produced, for event emission after the fact.
#[derive(Debug, Default)]
pub struct LinkBatchOutcome {
    pub created: Vec<(Link, LorebookEntry)>,
    pub skipped: Vec<Link>,
    pub failed: Vec<Link>,
}

impl LinkBatchOutcome {
    pub fn processed(&self) -> usize {
        self.created.len() + self.skipped.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct CreateApiRequestLog {
    pub project_id: String,
    pub job_id: Option<Uuid>,
    pub api_provider: String,
    pub model_name: String,
    pub request: Value,
    pub response: Option<Value>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub calculated_cost: Option<f64>,
    pub latency_ms: i64,
    pub error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_kind_round_trips_through_strings() {
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::parse(kind.as_str()).unwrap(), *kind);
        }
        assert!(TaskKind::parse("reticulate_splines").is_err());
    }

    #[test]
    fn payload_round_trips_by_task_kind() {
        let payload = JobPayload::ConfirmLinks(ConfirmLinksPayload {
            urls: vec!["https://example.test/a".into()],
        });
        let json = payload.to_json().unwrap().unwrap();
        let parsed = JobPayload::from_json(TaskKind::ConfirmLinks, Some(&json)).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn unit_payloads_store_null() {
        assert_eq!(JobPayload::GenerateSearchParams.to_json().unwrap(), None);
        let parsed = JobPayload::from_json(TaskKind::GenerateSearchParams, None).unwrap();
        assert_eq!(parsed, JobPayload::GenerateSearchParams);
    }

    #[test]
    fn result_parses_by_task_kind() {
        let json = r#"{"new_links":["a"],"existing_links":[],"new_sources_created":1,"selectors_generated":2}"#;
        let result = JobResult::from_json(TaskKind::DiscoverAndCrawlSources, json).unwrap();
        match result {
            JobResult::Discover(d) => {
                assert_eq!(d.new_links, vec!["a"]);
                assert_eq!(d.selectors_generated, 2);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn job_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }
}
