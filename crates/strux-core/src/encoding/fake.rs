//! Schema-driven fake data, used to show the model a realistic example
//! instance instead of a dry schema in YAML/TOML instruction blocks.
//!
//! Values are randomized but type-correct. Output is intentionally
//! non-deterministic per call; it only ever lands in prompt content.

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};

const WORDS: &[&str] = &[
    "amber", "brook", "cedar", "delta", "ember", "fjord", "grove", "harbor", "indigo", "juniper",
    "kestrel", "lumen", "meadow", "nimbus", "orchard", "pebble",
];

const MAX_DEPTH: usize = 8;

/// Generate a fake instance conforming to `schema`
pub fn instance(schema: &Value) -> Value {
    let mut rng = rand::thread_rng();
    generate(schema, schema, &mut rng, 0)
}

fn generate(schema: &Value, root: &Value, rng: &mut impl Rng, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::Null;
    }
    let Some(obj) = schema.as_object() else {
        return Value::Null;
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        if let Some(resolved) = resolve_ref(reference, root) {
            return generate(resolved, root, rng, depth + 1);
        }
        return Value::Null;
    }
    if let Some(constant) = obj.get("const") {
        return constant.clone();
    }
    if let Some(options) = obj.get("enum").and_then(Value::as_array) {
        return options.choose(rng).cloned().unwrap_or(Value::Null);
    }
    for combinator in ["oneOf", "anyOf", "allOf"] {
        if let Some(variants) = obj.get(combinator).and_then(Value::as_array) {
            if let Some(first) = variants.first() {
                return generate(first, root, rng, depth + 1);
            }
        }
    }

    match type_of(obj) {
        "string" => fake_string(obj, rng),
        "integer" => json!(rng.gen_range(1..=99)),
        "number" => json!((rng.gen_range(1.0..100.0f64) * 100.0).round() / 100.0),
        "boolean" => json!(rng.gen_bool(0.5)),
        "array" => {
            let item_schema = obj.get("items").cloned().unwrap_or(Value::Null);
            let len = rng.gen_range(1..=3);
            Value::Array(
                (0..len)
                    .map(|_| generate(&item_schema, root, rng, depth + 1))
                    .collect(),
            )
        }
        "object" => {
            let mut output = Map::new();
            if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
                for (key, prop_schema) in properties {
                    output.insert(key.clone(), generate(prop_schema, root, rng, depth + 1));
                }
            }
            Value::Object(output)
        }
        "null" => Value::Null,
        _ => Value::Null,
    }
}

fn type_of(obj: &Map<String, Value>) -> &str {
    match obj.get("type") {
        Some(Value::String(t)) => t.as_str(),
        // Nullable types come through as ["string", "null"]; take the first
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("null"),
        _ if obj.contains_key("properties") => "object",
        _ => "",
    }
}

fn fake_string(obj: &Map<String, Value>, rng: &mut impl Rng) -> Value {
    match obj.get("format").and_then(Value::as_str) {
        Some("date") => json!("2024-06-01"),
        Some("date-time") => json!("2024-06-01T12:30:00Z"),
        Some("email") => json!(format!("{}@example.com", word(rng))),
        Some("uri") | Some("url") => json!(format!("https://example.com/{}", word(rng))),
        Some("uuid") => json!("4a1c71b4-2f84-4d6e-9c7a-3f6f0d8b9e21"),
        _ => json!(format!("{} {}", word(rng), word(rng))),
    }
}

fn word(rng: &mut impl Rng) -> &'static str {
    WORDS.choose(rng).copied().unwrap_or("amber")
}

fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
    // Only local pointers like "#/$defs/Name" are resolvable
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}
