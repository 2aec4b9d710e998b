//! Output schemas for structured generation.
//!
//! A `Schema` is opaque to the rest of the crate. The only thing done to it is
//! removing the `$id` / `$schema` meta keys before it becomes a backend
//! output-format directive: generators add them, and several backends'
//! own schema validators reject or misread them.

use crate::models::{Result, SensemakeError};
use schemars::JsonSchema;
use serde_json::{Map, Value};

/// Keys that describe the schema document itself rather than the data.
const META_KEYS: [&str; 2] = ["$id", "$schema"];

/// Keywords whose object value maps property names (not keywords) to schemas.
const NAMED_SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

/// Keywords whose value is instance data, copied verbatim.
const LITERAL_KEYWORDS: [&str; 4] = ["const", "enum", "default", "examples"];

/// JSON Schema describing the expected shape of structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema(Value);

impl Schema {
    /// Wrap an existing JSON Schema document.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Derive the schema of a Rust type.
    pub fn for_type<T: JsonSchema>() -> Result<Self> {
        let schema = schemars::schema_for!(T);
        serde_json::to_value(&schema)
            .map(Self)
            .map_err(|e| SensemakeError::Internal(format!("Failed to serialize schema: {e}")))
    }

    /// The schema as given, meta keys included.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The schema as sent to a backend: a copy with every `$id` / `$schema`
    /// keyword removed, at any depth.
    pub fn to_directive(&self) -> Value {
        strip_schema(&self.0)
    }

    /// Name for backends that require one; taken from `title` when present.
    pub fn name(&self) -> &str {
        self.0
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("response")
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Copy a schema object, skipping meta keywords.
fn strip_schema(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                if META_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let child = if LITERAL_KEYWORDS.contains(&key.as_str()) {
                    child.clone()
                } else if NAMED_SCHEMA_MAPS.contains(&key.as_str()) {
                    strip_named_schemas(child)
                } else {
                    strip_schema(child)
                };
                out.insert(key.clone(), child);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_schema).collect()),
        other => other.clone(),
    }
}

/// Copy a name → schema map. The names themselves are data and are kept even
/// if a property happens to be called `$id`.
fn strip_named_schemas(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(name, schema)| (name.clone(), strip_schema(schema)))
                .collect(),
        ),
        other => strip_schema(other),
    }
}
