//! JSON Schema handling
//!
//! Schemas arrive as raw `serde_json::Value` fragments that may point into a
//! shared definition registry via `$ref`. The resolver inlines those pointers
//! so each schema can be compiled on its own, and the compiler cache keeps one
//! live validator per schema identity.

use serde_json::Value;
use std::collections::BTreeMap;

pub mod compiler;
pub mod resolve;

pub use compiler::{CompiledValidator, SchemaDraft, SchemaIdentity, ValidatorCache, fingerprint};
pub use resolve::{collect_refs, contains_ref, ensure_refs_known, resolve};

/// A JSON-Schema-compatible tree.
pub type SchemaFragment = Value;

/// Definition identifier (e.g. `/definitions/app/Todo`) to schema fragment.
pub type DefinitionRegistry = BTreeMap<String, SchemaFragment>;

/// Whether the schema describes a container (`object` or `array`).
pub fn is_container(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(kind)) => kind == "object" || kind == "array",
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|kind| kind == "object" || kind == "array"),
        _ => schema.get("properties").is_some() || schema.get("items").is_some(),
    }
}

/// Property names declared at the top level of an object schema.
pub fn property_names(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}
