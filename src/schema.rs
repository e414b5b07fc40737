//! JSON-Schema normalization for vendor tool declarations.
//!
//! Tool schemas travel as untyped maps and vendors disagree about what a
//! legal schema looks like. Two normalizers cover the divergence:
//!
//! - [`openai_strict`] shapes a schema for OpenAI strict function calling:
//!   every object lists all of its properties as `required`, regular
//!   objects get `additionalProperties: false`, and free-form value-typed
//!   maps — which strict mode forbids — are rewritten into
//!   `array<{key, value}>`. Callers sending env-var style maps need to
//!   reverse that rewrite when reading arguments back.
//! - [`gemini`] strips keywords the Generative Language API rejects and
//!   collapses `anyOf: [T, null]` into `T` with `nullable: true`.
//!
//! Both functions deep-copy their input and are idempotent:
//! `normalize(normalize(s)) == normalize(s)`.

use serde_json::{Value, json};

/// Formats OpenAI strict mode accepts; everything else is dropped.
const ALLOWED_FORMATS: [&str; 4] = ["date-time", "date", "time", "email"];

/// Normalize a schema for OpenAI strict function calling.
pub fn openai_strict(schema: &Value) -> Value {
    let mut copy = schema.clone();
    strict_visit(&mut copy);
    copy
}

fn strict_visit(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    let is_object = obj.get("type").and_then(Value::as_str) == Some("object");
    let ap_is_schema = matches!(obj.get("additionalProperties"), Some(Value::Object(_)));
    let has_props = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|m| !m.is_empty())
        .unwrap_or(false);

    if is_object && ap_is_schema && !has_props {
        // Free-form value-typed map. Strict mode has no way to express it,
        // so it becomes an array of {key, value} entries.
        let mut value_schema = obj
            .remove("additionalProperties")
            .unwrap_or_else(|| json!({}));
        strict_visit(&mut value_schema);
        let description = obj.get("description").cloned();

        let mut rewritten = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": value_schema,
                },
                "required": ["key", "value"],
                "additionalProperties": false,
            },
        });
        if let Some(desc) = description {
            rewritten["description"] = desc;
        }
        *value = rewritten;
        return;
    }

    if is_object {
        let keys: Vec<String> = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
            for (_, sub) in props.iter_mut() {
                strict_visit(sub);
            }
        }
        if obj.contains_key("properties") {
            obj.insert("required".into(), json!(keys));
        }
        if ap_is_schema {
            // A map alongside fixed properties: keep the value schema as-is.
            if let Some(ap) = obj.get_mut("additionalProperties") {
                strict_visit(ap);
            }
        } else {
            obj.insert("additionalProperties".into(), json!(false));
        }
    }

    if let Some(fmt) = obj.get("format").and_then(Value::as_str) {
        if !ALLOWED_FORMATS.contains(&fmt) {
            obj.remove("format");
        }
    }

    if let Some(items) = obj.get_mut("items") {
        strict_visit(items);
    }
    for keyword in ["anyOf", "oneOf", "allOf"] {
        if let Some(subs) = obj.get_mut(keyword).and_then(Value::as_array_mut) {
            for sub in subs {
                strict_visit(sub);
            }
        }
    }
    if let Some(defs) = obj.get_mut("$defs").and_then(Value::as_object_mut) {
        for (_, sub) in defs.iter_mut() {
            strict_visit(sub);
        }
    }
}

/// Normalize a schema for the Gemini / Code Assist function declarations.
pub fn gemini(schema: &Value) -> Value {
    let mut copy = schema.clone();
    gemini_visit(&mut copy);
    copy
}

fn gemini_visit(value: &mut Value) {
    if let Some(arr) = value.as_array_mut() {
        for sub in arr {
            gemini_visit(sub);
        }
        return;
    }
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    obj.remove("$schema");
    obj.remove("additionalProperties");
    obj.remove("title");

    // anyOf: [T, null] -> T + nullable
    if let Some(subs) = obj.get("anyOf").and_then(Value::as_array) {
        let non_null: Vec<Value> = subs
            .iter()
            .filter(|s| !is_null_schema(s))
            .cloned()
            .collect();
        if non_null.len() == 1 && non_null.len() < subs.len() {
            let mut inner = non_null.into_iter().next().unwrap();
            gemini_visit(&mut inner);
            let description = obj.get("description").cloned();
            *value = inner;
            if let Some(inner_obj) = value.as_object_mut() {
                if let Some(desc) = description {
                    inner_obj.entry("description").or_insert(desc);
                }
                inner_obj.insert("nullable".into(), json!(true));
            }
            return;
        }
    }

    if let Some(type_value) = obj.get_mut("type") {
        if let Some(s) = type_value.as_str() {
            *type_value = json!(s.to_lowercase());
        }
    }

    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, sub) in props.iter_mut() {
            gemini_visit(sub);
        }
    }
    if let Some(items) = obj.get_mut("items") {
        gemini_visit(items);
    }
    for keyword in ["anyOf", "oneOf", "allOf"] {
        if let Some(subs) = obj.get_mut(keyword).and_then(Value::as_array_mut) {
            for sub in subs {
                gemini_visit(sub);
            }
        }
    }
}

fn is_null_schema(schema: &Value) -> bool {
    schema
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t.eq_ignore_ascii_case("null"))
        .unwrap_or(false)
}
