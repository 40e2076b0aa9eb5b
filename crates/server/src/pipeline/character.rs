// crates/server/src/pipeline/character.rs
//! The character pipeline: fetch source content, generate the card,
//! regenerate single fields, and AI-edit stored source text.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use lorecard_core::llm::ResponseSchema;
use lorecard_core::scrape::{FetchOptions, Scraper};
use lorecard_core::template;
use lorecard_core::ChatMessage;
use lorecard_core::Role;

use lorecard_db::types::{
    AiEditResult, BackgroundJob, CardField, CardFields, FetchSourceContentResult, GenerateCardResult,
    JobPayload, JobResult, JobStatus, Project, ProjectStatus, RegenerateFieldResult,
    UpdateBackgroundJob, UpdateProjectSource,
};

use super::{
    build_request, generate_logged, parse_content, template_context, update_job, PipelineError,
    PipelineResult,
};
use crate::state::AppState;

fn card_schema() -> ResponseSchema {
    ResponseSchema::new(
        "character_card_response",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "The character's full name." },
                "description": { "type": "string", "description": "Physical and general description." },
                "persona": { "type": "string", "description": "Personality, demeanor, inner life." },
                "scenario": { "type": "string", "description": "The setting the character is in." },
                "first_message": { "type": "string", "description": "Opening message, roleplay style." },
                "example_messages": { "type": "string", "description": "Example exchanges with {{user}} and {{char}} placeholders." }
            },
            "required": ["name", "description", "persona", "scenario", "first_message", "example_messages"]
        }),
    )
}

fn field_schema() -> ResponseSchema {
    ResponseSchema::new(
        "regenerated_field_response",
        json!({
            "type": "object",
            "properties": {
                "new_content": {
                    "type": "string",
                    "description": "The newly generated text for the requested field."
                }
            },
            "required": ["new_content"]
        }),
    )
}

#[derive(Debug, Deserialize)]
struct RegeneratedField {
    new_content: String,
}

/// Scrape every listed source and cache its content. No LLM calls.
pub(super) async fn fetch_source_content(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    let JobPayload::FetchSourceContent(payload) = &job.payload else {
        return Err(PipelineError::Invalid(
            "invalid payload for fetch_source_content".into(),
        ));
    };

    let scraper = Scraper::new();
    let total = payload.source_ids.len() as i64;
    let mut fetched = 0i64;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            total_items: Some(total),
            processed_items: Some(0),
            progress: Some(0.0),
            ..Default::default()
        },
    )
    .await;

    for source_id in &payload.source_ids {
        let Some(source) = state.db.get_project_source(*source_id).await? else {
            tracing::warn!(job_id = %job.id, %source_id, "source not found, skipping fetch");
            continue;
        };

        let content = scraper.fetch(&source.url, FetchOptions::markdown()).await?;
        state
            .db
            .update_project_source(
                source.id,
                &UpdateProjectSource {
                    raw_content: Some(content.clone()),
                    content_char_count: Some(content.chars().count() as i64),
                    content_type: Some("markdown".into()),
                    ..Default::default()
                },
            )
            .await?;

        fetched += 1;
        update_job(
            state,
            &project.id,
            job.id,
            UpdateBackgroundJob {
                processed_items: Some(fetched),
                progress: Some(fetched as f64 / total.max(1) as f64 * 100.0),
                ..Default::default()
            },
        )
        .await;
    }

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::FetchSourceContent(FetchSourceContentResult {
                sources_fetched: fetched,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}

/// One LLM call over the concatenated source contents, producing all six
/// card fields. Consumes whatever `raw_content` is present; sources without
/// content contribute nothing.
pub(super) async fn generate_character_card(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    let JobPayload::GenerateCharacterCard(payload) = &job.payload else {
        return Err(PipelineError::Invalid(
            "invalid payload for generate_character_card".into(),
        ));
    };

    let content = concat_source_contents(state, &payload.source_ids).await?;
    if content.is_empty() {
        return Err(PipelineError::Invalid(
            "no source content available; fetch source content first".into(),
        ));
    }

    let provider = state.provider_for_project(project).await?;
    let context = template_context(state, project, &[("content", json!(content))]).await?;
    let messages = template::render_messages(&project.templates.character_generation, &context)?;
    let request = build_request(project, messages, Some(card_schema()));

    let response = generate_logged(state, project, job.id, &provider, request).await?;
    let fields: CardFields = parse_content(&response.content)?;

    let card = state.db.upsert_character_card(&project.id, &fields).await?;
    state
        .db
        .set_project_status(&project.id, ProjectStatus::Completed)
        .await?;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::GenerateCharacterCard(GenerateCardResult {
                character_card_id: card.id,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}

/// Rewrite one card field from a context bundle of selected existing fields
/// and selected source contents.
pub(super) async fn regenerate_character_field(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    let JobPayload::RegenerateCharacterField(payload) = &job.payload else {
        return Err(PipelineError::Invalid(
            "invalid payload for regenerate_character_field".into(),
        ));
    };

    let card = state
        .db
        .get_character_card(&project.id)
        .await?
        .ok_or_else(|| PipelineError::Invalid("project has no character card".into()))?;

    let mut context_bundle = Map::new();
    if !payload.use_card_fields.is_empty() {
        let mut card_fields = Map::new();
        for field in &payload.use_card_fields {
            let value = match field {
                CardField::Name => &card.name,
                CardField::Description => &card.description,
                CardField::Persona => &card.persona,
                CardField::Scenario => &card.scenario,
                CardField::FirstMessage => &card.first_message,
                CardField::ExampleMessages => &card.example_messages,
            };
            card_fields.insert(field.as_str().to_string(), json!(value));
        }
        context_bundle.insert("card".into(), Value::Object(card_fields));
    }
    let source_material = concat_source_contents(state, &payload.source_ids).await?;
    if !source_material.is_empty() {
        context_bundle.insert("source_material".into(), json!(source_material));
    }

    let provider = state.provider_for_project(project).await?;
    let context = template_context(
        state,
        project,
        &[
            ("context", Value::Object(context_bundle)),
            ("field_to_regenerate", json!(payload.field.as_str())),
        ],
    )
    .await?;
    let messages =
        template::render_messages(&project.templates.character_field_regeneration, &context)?;
    let request = build_request(project, messages, Some(field_schema()));

    let response = generate_logged(state, project, job.id, &provider, request).await?;
    let regenerated: RegeneratedField = parse_content(&response.content)?;

    state
        .db
        .set_character_card_field(&project.id, payload.field, &regenerated.new_content)
        .await?
        .ok_or_else(|| PipelineError::Invalid("character card vanished mid-update".into()))?;

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::RegenerateField(RegenerateFieldResult {
                field: payload.field,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}

/// Apply an edit instruction to a source's stored content, snapshotting the
/// prior content whenever the edit changes it.
pub(super) async fn ai_edit_source_content(
    state: &AppState,
    job: &BackgroundJob,
    project: &Project,
) -> PipelineResult<()> {
    let JobPayload::AiEditSourceContent(payload) = &job.payload else {
        return Err(PipelineError::Invalid(
            "invalid payload for ai_edit_source_content".into(),
        ));
    };

    let source = state
        .db
        .get_project_source(payload.source_id)
        .await?
        .ok_or_else(|| PipelineError::Invalid("source not found".into()))?;
    let original = source
        .raw_content
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PipelineError::Invalid("source has no content to edit".into()))?;

    let provider = state.provider_for_project(project).await?;

    let mut user_prompt = format!(
        "**ORIGINAL CONTENT:**\n{original}\n\n**EDIT INSTRUCTION:**\n{}",
        payload.edit_instruction
    );
    if payload.include_full_context {
        let full_context = concat_source_contents_for_project(state, &project.id).await?;
        if !full_context.is_empty() {
            user_prompt.push_str(&format!("\n\n**FULL PROJECT CONTEXT:**\n{full_context}"));
        }
    }
    let messages = vec![
        ChatMessage::new(
            Role::System,
            "You are an editor. Apply the edit instruction to the original content and return \
             the complete rewritten text as `new_content`. Preserve everything the instruction \
             does not ask you to change.",
        ),
        ChatMessage::new(Role::User, user_prompt),
    ];
    let request = build_request(project, messages, Some(field_schema()));

    let response = generate_logged(state, project, job.id, &provider, request).await?;
    let edited: RegeneratedField = parse_content(&response.content)?;

    let version_created = edited.new_content != original;
    if version_created {
        state
            .db
            .create_source_content_version(source.id, &original)
            .await?;
        state
            .db
            .update_project_source(
                source.id,
                &UpdateProjectSource {
                    raw_content: Some(edited.new_content.clone()),
                    content_char_count: Some(edited.new_content.chars().count() as i64),
                    ..Default::default()
                },
            )
            .await?;
    }

    update_job(
        state,
        &project.id,
        job.id,
        UpdateBackgroundJob {
            status: Some(JobStatus::Completed),
            result: Some(JobResult::AiEdit(AiEditResult {
                source_id: source.id,
                version_created,
            })),
            ..Default::default()
        },
    )
    .await;
    Ok(())
}

/// Join the cached contents of the named sources, separated by rules.
async fn concat_source_contents(
    state: &AppState,
    source_ids: &[uuid::Uuid],
) -> PipelineResult<String> {
    let mut parts = Vec::new();
    for source_id in source_ids {
        if let Some(source) = state.db.get_project_source(*source_id).await? {
            if let Some(content) = source.raw_content.filter(|c| !c.is_empty()) {
                parts.push(content);
            }
        }
    }
    Ok(parts.join("\n\n---\n\n"))
}

async fn concat_source_contents_for_project(
    state: &AppState,
    project_id: &str,
) -> PipelineResult<String> {
    let sources = state.db.list_sources_for_project(project_id).await?;
    let parts: Vec<String> = sources
        .into_iter()
        .filter_map(|s| s.raw_content.filter(|c| !c.is_empty()))
        .collect();
    Ok(parts.join("\n\n---\n\n"))
}
