// crates/server/src/default_templates.rs
//! Default global templates, seeded at startup (insert-if-absent so operator
//! edits persist). Addressed by stable ids from the pipeline and providers.

use lorecard_core::template::JSON_FORMATTER_TEMPLATE;
use lorecard_db::Database;
use lorecard_db::DbResult;

pub const LOREBOOK_DEFINITION: &str = r#"### WORLDINFO (LOREBOOK) DEFINITION

A Lorebook is a collection of entries used to provide an AI with consistent, contextual information about a fictional world. Each entry represents a single concept (e.g., a character, location, or item).

**Purpose:** To ensure the AI consistently recalls key details about the world during role-playing or storytelling.

**Standard Entry Structure:**
- `title`: A concise, descriptive title for the entry (e.g., "Aragorn", "The One Ring").
- `keywords`: A list of keywords that cause this entry to be injected into the AI's context. Always includes the name and common aliases. 1-4 strong keywords.
- `content`: A well-written, factual summary of the subject in an encyclopedic, in-universe tone. Be 100-400 words. Use markdown for formatting.

**Example Entry:**
{
  "title": "Dragonstone Citadel",
  "keywords": ["Dragonstone", "Citadel", "Obsidian Fortress"],
  "content": "A volcanic fortress built from black obsidian. It is the ancestral seat of House Targaryen and home to the ancient Order of Flames, who guard the Eternal Fire - a magical flame that grants visions of the future."
}
"#;

pub const SEARCH_PARAMS_PROMPT: &str = r#"--- role: system
{{ globals.lorebook_definition }}

--- role: system
Based on the user's request, produce search parameters for creating a lorebook. These parameters will guide the web scraping and content extraction process.

Return three fields:
- `purpose`: a clear statement of what information to gather, based on the request type.
- `extraction_notes`: concrete guidelines for what to extract from each page.
- `criteria`: simple validation requirements a page must meet to produce an entry. Reject list pages and passing mentions.

--- role: user
{{ project.prompt }}
"#;

pub const SELECTOR_PROMPT: &str = r#"--- role: system
{{ globals.lorebook_definition }}

--- role: system
Your primary task is to analyze the provided HTML and identify CSS selectors for three distinct types of links: **Content Links**, **Category Links**, and a **Pagination Link**.

**Definitions:**
1.  **Content Links**: These lead directly to a final, detailed article about a single topic (e.g., a character profile, an item description, a specific location's page).
2.  **Category Links**: These lead to another page that is also a list, index, or sub-category of more links.
3.  **Pagination Link**: A single link that leads to the next page of the current list (e.g., a "Next" button).

**Project Goal:**
- Purpose: {{ project.search_params.purpose }}
- Extraction Notes: {{ project.search_params.extraction_notes }}
- Criteria for Content: {{ project.search_params.criteria }}

**Rules for Selector Generation:**
1.  **Prioritize Semantics**: Prefer selectors with meaningful class names or attributes. Avoid generic selectors like `div > a`.
2.  **Distinguish Link Types**: A selector is for a Category Link if its target pages are primarily other lists; a Content Link selector targets detailed articles matching the criteria.
3.  **Content Precedence**: If a link could be considered both, classify it as a Content Link. A link is a category ONLY if it is not a content link.
4.  **Be Specific**: Do not capture navigation menus, sidebars, or footers.
5.  **Return Empty Lists**: If no selectors of a type exist on the page, return an empty list for that key.
6.  **Pagination**: `pagination_selector` is a single, specific selector for the "next page" element, or null if none exists.

--- role: user
{{ content }}
"#;

pub const ENTRY_CREATION_PROMPT: &str = r#"--- role: system
{{ globals.lorebook_definition }}

--- role: system
Analyze the following source content (extracted from {{ source.url }}) and create a single, detailed lorebook entry.

**CRITERIA FOR VALIDATION:**
*{{ project.search_params.criteria }}*

**Step 1: Validate the Content**
- Determine whether the content meets the criteria above.
- If it meets the criteria, set `valid` to true and proceed to Step 2.
- If it does not, set `valid` to false, provide a 1-2 sentence `reason`, and set `entry` to null.

**Step 2: Create the Lorebook Entry (only if valid is true)**

Purpose: {{ project.search_params.purpose }}
Guidelines: {{ project.search_params.extraction_notes }}

--- role: user
{{ content }}
"#;

pub const CHARACTER_CARD_DEFINITION: &str = r#"### CHARACTER CARD DEFINITION

A character card is a structured persona used to guide an AI's behavior in roleplay or storytelling. Fields:

- `name`: The character's full name.
- `description`: Physical appearance and general description.
- `persona`: Personality, demeanor, speech patterns, inner life.
- `scenario`: The setting or situation the character is in.
- `first_message`: The character's opening message, written in roleplay style.
- `example_messages`: Example dialogue exchanges using {{user}} and {{char}} placeholders.
"#;

pub const CHARACTER_GENERATION_PROMPT: &str = r#"--- role: system
{{ globals.character_card_definition }}

--- role: system
Using the source material below, write a complete character card. Every field must be filled. Write `first_message` and `example_messages` in roleplay style with {{ "{{user}}" }} and {{ "{{char}}" }} placeholders.

--- role: user
{{ content }}
"#;

pub const CHARACTER_FIELD_REGENERATION_PROMPT: &str = r#"--- role: system
{{ globals.character_card_definition }}

--- role: system
You are rewriting one field of an existing character card.

{% if context.card %}
**EXISTING CARD FIELDS:**
{{ context.card | tojson }}
{% endif %}
{% if context.source_material %}
**RELEVANT SOURCE MATERIAL:**
{{ context.source_material }}
{% endif %}

Based on the context above, provide the new content for the "{{ field_to_regenerate }}" field. Output only the raw text of the new field, with no additional commentary.
"#;

struct Seed {
    id: &'static str,
    name: &'static str,
    content: &'static str,
}

const SEEDS: &[Seed] = &[
    Seed {
        id: "lorebook-definition",
        name: "lorebook_definition",
        content: LOREBOOK_DEFINITION,
    },
    Seed {
        id: "search-params-prompt",
        name: "search_params_prompt",
        content: SEARCH_PARAMS_PROMPT,
    },
    Seed {
        id: "selector-prompt",
        name: "selector_prompt",
        content: SELECTOR_PROMPT,
    },
    Seed {
        id: "entry-creation-prompt",
        name: "entry_creation_prompt",
        content: ENTRY_CREATION_PROMPT,
    },
    Seed {
        id: "json-formatter-prompt",
        name: "json_formatter_prompt",
        content: JSON_FORMATTER_TEMPLATE,
    },
    Seed {
        id: "character-card-definition",
        name: "character_card_definition",
        content: CHARACTER_CARD_DEFINITION,
    },
    Seed {
        id: "character-generation-prompt",
        name: "character_generation_prompt",
        content: CHARACTER_GENERATION_PROMPT,
    },
    Seed {
        id: "character-field-regeneration-prompt",
        name: "character_field_regeneration_prompt",
        content: CHARACTER_FIELD_REGENERATION_PROMPT,
    },
];

/// Insert any missing default templates.
pub async fn seed_default_templates(db: &Database) -> DbResult<usize> {
    let mut created = 0;
    for seed in SEEDS {
        if db.ensure_global_template(seed.id, seed.name, seed.content).await? {
            tracing::info!(id = seed.id, "created default global template");
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        let first = seed_default_templates(&db).await.unwrap();
        assert_eq!(first, SEEDS.len());
        let second = seed_default_templates(&db).await.unwrap();
        assert_eq!(second, 0);
    }
}
