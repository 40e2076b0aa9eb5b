// crates/core/src/llm/schema.rs
//! Pure functions over JSON-schema documents.
//!
//! `normalize` runs at the provider boundary before a schema is sent to a
//! backend or embedded in a prompt. It is deliberately independent of any
//! serialization framework and idempotent.

use serde_json::{Map, Value};

/// Normalize a schema document:
/// inline every `#/$defs/...` reference, drop the `$defs` block, and set
/// `additionalProperties: false` on every object node where it is absent or
/// `true`.
pub fn normalize(mut schema: Value) -> Value {
    let defs = match &mut schema {
        Value::Object(map) => map
            .remove("$defs")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    };
    inline_refs(schema, &defs)
}

fn inline_refs(value: Value, defs: &Map<String, Value>) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if let Some(name) = reference.strip_prefix("#/$defs/") {
                    if let Some(definition) = defs.get(name) {
                        return inline_refs(definition.clone(), defs);
                    }
                }
            }

            let mut out = Map::with_capacity(map.len());
            let has_properties = map.contains_key("properties");
            for (key, child) in map {
                out.insert(key, inline_refs(child, defs));
            }
            if has_properties {
                let open = match out.get("additionalProperties") {
                    None | Some(Value::Bool(true)) => true,
                    _ => false,
                };
                if open {
                    out.insert("additionalProperties".into(), Value::Bool(false));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| inline_refs(v, defs)).collect())
        }
        other => other,
    }
}

/// Synthesize a deterministic example instance from a schema, used by the
/// prompt-engineered JSON strategy. Strings become placeholder text, numbers
/// 123, booleans true, arrays `[]`, objects `{}`.
pub fn example_from_schema(schema: &Value) -> String {
    let mut example = Map::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in properties {
            let value = match prop.get("type").and_then(Value::as_str) {
                Some("string") => Value::String(format!("string value for {key}")),
                Some("number") | Some("integer") => Value::from(123),
                Some("boolean") => Value::Bool(true),
                Some("array") => Value::Array(vec![]),
                Some("object") => Value::Object(Map::new()),
                _ => Value::Null,
            };
            example.insert(key.clone(), value);
        }
    }
    serde_json::to_string_pretty(&Value::Object(example)).unwrap_or_else(|_| "{}".into())
}

/// Extract the JSON payload from a model reply: first fenced code block,
/// falling back to a naive first-`{` / last-`}` brace scan.
pub fn extract_json_block(text: &str) -> Option<String> {
    let fence = regex_lite::Regex::new(r"```(?:\w+\n|\n)([\s\S]*?)```").expect("valid fence regex");
    if let Some(captures) = fence.captures(text) {
        return Some(captures[1].trim().to_string());
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        return Some(text[start..=end].trim().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn normalize_inlines_refs_and_closes_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "entry": { "$ref": "#/$defs/Entry" },
                "valid": { "type": "boolean" }
            },
            "$defs": {
                "Entry": {
                    "type": "object",
                    "properties": { "title": { "type": "string" } }
                }
            }
        });

        let normalized = normalize(schema);
        assert_eq!(normalized["additionalProperties"], json!(false));
        assert_eq!(
            normalized["properties"]["entry"]["properties"]["title"]["type"],
            json!("string")
        );
        assert_eq!(
            normalized["properties"]["entry"]["additionalProperties"],
            json!(false)
        );
        assert!(normalized.get("$defs").is_none());
    }

    #[test]
    fn normalize_preserves_explicit_false() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        });
        let normalized = normalize(schema.clone());
        assert_eq!(normalized, schema);
    }

    #[test]
    fn normalize_overrides_explicit_true() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": true
        });
        let normalized = normalize(schema);
        assert_eq!(normalized["additionalProperties"], json!(false));
    }

    #[test]
    fn normalize_is_idempotent() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": { "$ref": "#/$defs/Item" }
                }
            },
            "$defs": {
                "Item": { "type": "object", "properties": { "x": { "type": "integer" } } }
            }
        });
        let once = normalize(schema);
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn example_covers_scalar_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "count": { "type": "integer" },
                "valid": { "type": "boolean" },
                "keywords": { "type": "array" },
                "nested": { "type": "object" }
            }
        });
        let example: Value = serde_json::from_str(&example_from_schema(&schema)).unwrap();
        assert_eq!(example["title"], json!("string value for title"));
        assert_eq!(example["count"], json!(123));
        assert_eq!(example["valid"], json!(true));
        assert_eq!(example["keywords"], json!([]));
        assert_eq!(example["nested"], json!({}));
    }

    #[test]
    fn extract_prefers_fenced_block() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\ntrailing prose";
        assert_eq!(extract_json_block(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extract_falls_back_to_brace_scan() {
        let text = "no fences here {\"a\": {\"b\": 2}} done";
        assert_eq!(extract_json_block(text).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn extract_returns_none_without_json() {
        assert!(extract_json_block("plain prose, no braces").is_none());
    }
}
