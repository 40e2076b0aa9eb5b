// crates/core/src/template.rs
//! Role-delimited multi-message prompt rendering.
//!
//! A template is split on lines matching `--- role: <system|user|assistant>`;
//! each segment renders into one message. Without delimiters the whole
//! rendered text becomes a single user message. Rendering supports
//! `{{var.path}}` interpolation, `{% if %}` blocks, and filters such as
//! `join`/`tojson`.

use regex_lite::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{ChatMessage, Role};

/// Built-in formatter prompt for prompt-engineered JSON backends. Seeded as
/// the `json-formatter-prompt` global template so operators can tune it.
pub const JSON_FORMATTER_TEMPLATE: &str = r#"--- role: user
You are a highly specialized AI assistant. Your SOLE purpose is to generate a single, valid JSON object that strictly adheres to the provided JSON schema.

**CRITICAL INSTRUCTIONS:**
1.  You MUST wrap the entire JSON object in a markdown code block (```json ... ```).
2.  Your response MUST NOT contain any explanatory text, comments, or any other content outside of this single code block.
3.  The JSON object inside the code block MUST be valid and conform to the schema.

**JSON SCHEMA TO FOLLOW:**
```json
{{ schema }}
```

**EXAMPLE OF A PERFECT RESPONSE:**
```json
{{ example_response }}
```
"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render failed: {0}")]
    Render(#[from] minijinja::Error),
}

/// Render a single template string against a JSON context.
pub fn render_str(template: &str, context: &Value) -> Result<String, TemplateError> {
    let env = minijinja::Environment::new();
    Ok(env.render_str(template, context)?)
}

/// Parse a role-delimited template into rendered chat messages.
///
/// Unknown role tokens fall back to `user`. Messages whose rendered content
/// is empty are dropped.
pub fn render_messages(template: &str, context: &Value) -> Result<Vec<ChatMessage>, TemplateError> {
    let delimiter = Regex::new(r"(?m)^---\s*role:\s*(\w+)\s*$").expect("valid delimiter regex");

    let markers: Vec<(usize, usize, Role)> = delimiter
        .captures_iter(template)
        .map(|captures| {
            let whole = captures.get(0).expect("match");
            let role = match captures[1].to_ascii_lowercase().as_str() {
                "system" => Role::System,
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            (whole.start(), whole.end(), role)
        })
        .collect();

    // No delimiters: the whole template is a single user message.
    if markers.is_empty() {
        let rendered = render_str(template, context)?;
        let trimmed = rendered.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![ChatMessage::new(Role::User, trimmed)]);
    }

    let mut messages = Vec::with_capacity(markers.len());
    for (i, (_, segment_start, role)) in markers.iter().enumerate() {
        let segment_end = markers
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(template.len());
        let segment = &template[*segment_start..segment_end];

        let rendered = render_str(segment, context)?;
        let trimmed = rendered.trim();
        if !trimmed.is_empty() {
            messages.push(ChatMessage::new(*role, trimmed));
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn splits_roles_and_interpolates() {
        let template = "--- role: system\nYou build {{ project.name }} lore.\n--- role: user\n{{ content }}";
        let context = json!({ "project": { "name": "Skyrim" }, "content": "page text" });

        let messages = render_messages(template, &context).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You build Skyrim lore.");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "page text");
    }

    #[test]
    fn plain_template_becomes_single_user_message() {
        let messages = render_messages("Summarize {{ topic }}.", &json!({ "topic": "dragons" }))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Summarize dragons.");
    }

    #[test]
    fn empty_rendered_segments_are_dropped() {
        let template =
            "--- role: system\n{% if flag %}only when flagged{% endif %}\n--- role: user\nalways";
        let messages = render_messages(template, &json!({ "flag": false })).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "always");

        let messages = render_messages(template, &json!({ "flag": true })).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn unknown_role_token_defaults_to_user() {
        let template = "--- role: narrator\nonce upon a time";
        let messages = render_messages(template, &json!({})).unwrap();
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn horizontal_rules_do_not_split_messages() {
        let template = "--- role: user\nabove\n---\nbelow";
        let messages = render_messages(template, &json!({})).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("above"));
        assert!(messages[0].content.contains("below"));
    }

    #[test]
    fn join_filter_is_available() {
        let template = "keywords: {{ keywords | join(\", \") }}";
        let messages =
            render_messages(template, &json!({ "keywords": ["a", "b", "c"] })).unwrap();
        assert_eq!(messages[0].content, "keywords: a, b, c");
    }

    #[test]
    fn formatter_template_renders_schema_and_example() {
        let context = json!({
            "schema": "{\"type\": \"object\"}",
            "example_response": "{\"x\": 1}"
        });
        let messages = render_messages(JSON_FORMATTER_TEMPLATE, &context).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("{\"type\": \"object\"}"));
        assert!(messages[0].content.contains("{\"x\": 1}"));
    }
}
