//! Compiled validator cache
//!
//! Validators are keyed by schema identity: the schema's `$id` when present,
//! otherwise the name it is registered under. Registering a schema again under
//! the same identity either reuses the live validator (same blake3
//! fingerprint) or replaces it in one insert, so at most one validator is ever
//! live per identity.
//!
//! Writers that must not leak half-finished work compile into a [`stage`]d
//! copy and [`publish`] it once they commit.
//!
//! [`stage`]: ValidatorCache::stage
//! [`publish`]: ValidatorCache::publish

use blake3::Hasher;
use jsonschema::JSONSchema;
use jsonschema::error::ValidationErrorKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::runtime::error::{FieldIssue, SchemaError, SchemaResult, ValidationError};

/// Identity under which a compiled validator is cached
pub type SchemaIdentity = String;

/// JSON Schema draft used by the compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaDraft {
    /// Draft 4
    Draft4,
    /// Draft 6
    Draft6,
    /// Draft 7
    #[default]
    Draft7,
}

impl From<SchemaDraft> for jsonschema::Draft {
    fn from(draft: SchemaDraft) -> Self {
        match draft {
            SchemaDraft::Draft4 => jsonschema::Draft::Draft4,
            SchemaDraft::Draft6 => jsonschema::Draft::Draft6,
            SchemaDraft::Draft7 => jsonschema::Draft::Draft7,
        }
    }
}

/// A resolved schema compiled into a reusable validation function
pub struct CompiledValidator {
    identity: SchemaIdentity,
    fingerprint: String,
    schema: Arc<Value>,
    compiled: JSONSchema,
}

impl CompiledValidator {
    /// Identity the validator was compiled for
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Fingerprint of the resolved schema
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The resolved schema this validator was compiled from
    pub fn schema(&self) -> &Arc<Value> {
        &self.schema
    }

    /// Quick boolean check without collecting issues
    pub fn is_valid(&self, value: &Value) -> bool {
        self.compiled.is_valid(value)
    }

    /// Validate `value`, reporting every failing field annotated with `message`.
    pub fn validate(&self, message: &str, value: &Value) -> Result<(), ValidationError> {
        let Err(errors) = self.compiled.validate(value) else {
            return Ok(());
        };

        let issues = errors
            .map(|error| {
                let mut path = error.instance_path.to_string();
                if let ValidationErrorKind::Required { property } = &error.kind {
                    let field = property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string());
                    path = format!("{}/{}", path, field);
                }
                let schema_path = error.schema_path.to_string();
                let keyword = schema_path.rsplit('/').next().unwrap_or_default().to_string();

                FieldIssue {
                    message: message.to_string(),
                    path,
                    keyword,
                    detail: error.to_string(),
                }
            })
            .collect();

        Err(ValidationError {
            message: message.to_string(),
            issues,
        })
    }
}

impl fmt::Debug for CompiledValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledValidator")
            .field("identity", &self.identity)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Cache of compiled validators keyed by schema identity
#[derive(Debug)]
pub struct ValidatorCache {
    draft: SchemaDraft,
    entries: RwLock<HashMap<SchemaIdentity, Arc<CompiledValidator>>>,
}

impl ValidatorCache {
    /// Create an empty cache compiling with the given draft
    pub fn new(draft: SchemaDraft) -> Self {
        Self {
            draft,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Draft used for compilation
    pub fn draft(&self) -> SchemaDraft {
        self.draft
    }

    /// Compile an already resolved schema, reusing or replacing the entry for its identity.
    pub fn compile(&self, name: &str, resolved: &Value) -> SchemaResult<Arc<CompiledValidator>> {
        let fingerprint = fingerprint(resolved);
        let identity = identity_of(name, resolved);

        if let Some(existing) = self.entries.read().get(&identity) {
            if existing.fingerprint == fingerprint {
                tracing::debug!(schema = name, identity = %identity, "reusing compiled validator");
                return Ok(Arc::clone(existing));
            }
        }

        let compiled = compile_document(name, resolved, self.draft)?;
        let validator = Arc::new(CompiledValidator {
            identity: identity.clone(),
            fingerprint,
            schema: Arc::new(resolved.clone()),
            compiled,
        });

        let previous = self
            .entries
            .write()
            .insert(identity.clone(), Arc::clone(&validator));
        if previous.is_some() {
            tracing::debug!(schema = name, identity = %identity, "replaced compiled validator");
        } else {
            tracing::debug!(schema = name, identity = %identity, "compiled validator");
        }

        Ok(validator)
    }

    /// Copy of this cache to compile into without touching the live entries.
    pub fn stage(&self) -> ValidatorCache {
        Self {
            draft: self.draft,
            entries: RwLock::new(self.entries.read().clone()),
        }
    }

    /// Make the entries of `staged` live, keeping only the identities in `live`.
    ///
    /// Anything else is evicted, so the cache holds exactly the validators the
    /// caller's committed state still refers to.
    pub fn publish<'i, I>(&self, staged: ValidatorCache, live: I)
    where
        I: IntoIterator<Item = &'i str>,
    {
        let live: HashSet<&str> = live.into_iter().collect();
        let mut entries = staged.entries.into_inner();
        let staged_len = entries.len();
        entries.retain(|identity, _| live.contains(identity.as_str()));

        let evicted = staged_len - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, live = entries.len(), "evicted unused validators");
        }
        *self.entries.write() = entries;
    }

    /// Live validator for an identity
    pub fn get(&self, identity: &str) -> Option<Arc<CompiledValidator>> {
        self.entries.read().get(identity).cloned()
    }

    /// Whether a validator is live for the identity
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.read().contains_key(identity)
    }

    /// Number of live validators
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached validator
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ValidatorCache {
    fn default() -> Self {
        Self::new(SchemaDraft::default())
    }
}

/// Compute a stable fingerprint for a schema document
pub fn fingerprint(schema: &Value) -> String {
    let mut hasher = Hasher::new();
    hasher.update(schema.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn identity_of(name: &str, schema: &Value) -> SchemaIdentity {
    match schema.get("$id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => format!("anon:{}", name),
    }
}

fn compile_document(name: &str, resolved: &Value, draft: SchemaDraft) -> SchemaResult<JSONSchema> {
    // Identity is tracked by the cache; the compiler sees an anonymous document.
    let mut document = resolved.clone();
    if let Value::Object(map) = &mut document {
        map.remove("$id");
    }

    JSONSchema::options()
        .with_draft(draft.into())
        .compile(&document)
        .map_err(|err| SchemaError::Compile {
            schema: name.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_schema() -> Value {
        json!({
            "$id": "/definitions/app/AddTodo",
            "type": "object",
            "required": ["title"],
            "properties": {"title": {"type": "string"}}
        })
    }

    #[test]
    fn test_fingerprint_stability() {
        assert_eq!(fingerprint(&todo_schema()), fingerprint(&todo_schema()));
        assert_ne!(fingerprint(&todo_schema()), fingerprint(&json!({"type": "string"})));
    }

    #[test]
    fn test_recompiling_same_identity_keeps_one_entry() {
        let cache = ValidatorCache::default();

        let first = cache.compile("AddTodo", &todo_schema()).unwrap();
        let second = cache.compile("AddTodo", &todo_schema()).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.identity(), "/definitions/app/AddTodo");
    }

    #[test]
    fn test_redefinition_replaces_entry() {
        let cache = ValidatorCache::default();
        let old = cache.compile("AddTodo", &todo_schema()).unwrap();

        let mut changed = todo_schema();
        changed["required"] = json!(["title", "due"]);
        let new = cache.compile("AddTodo", &changed).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&old, &new));
        let live = cache.get("/definitions/app/AddTodo").unwrap();
        assert!(Arc::ptr_eq(&live, &new));
        assert!(!live.is_valid(&json!({"title": "x"})));
    }

    #[test]
    fn test_anonymous_schemas_keyed_by_name() {
        let cache = ValidatorCache::default();
        let a = cache.compile("A", &json!({"type": "string"})).unwrap();
        let b = cache.compile("B", &json!({"type": "integer"})).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(a.identity(), "anon:A");
        assert_ne!(a.identity(), b.identity());

        for bound in 0..10 {
            cache.compile("A", &json!({"type": "string", "maxLength": bound})).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.get("anon:A").unwrap().is_valid(&json!("long text")));
    }

    #[test]
    fn test_staged_compiles_stay_private_until_published() {
        let cache = ValidatorCache::default();
        let live = cache.compile("AddTodo", &todo_schema()).unwrap();

        let staged = cache.stage();
        let mut changed = todo_schema();
        changed["required"] = json!(["text"]);
        let pending = staged.compile("AddTodo", &changed).unwrap();
        staged.compile("Other", &json!({"type": "string"})).unwrap();

        assert!(Arc::ptr_eq(&cache.get("/definitions/app/AddTodo").unwrap(), &live));
        assert_eq!(cache.len(), 1);

        cache.publish(staged, [pending.identity()]);
        assert!(Arc::ptr_eq(&cache.get("/definitions/app/AddTodo").unwrap(), &pending));
        assert!(!cache.contains("anon:Other"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_required_issue_points_at_field() {
        let cache = ValidatorCache::default();
        let validator = cache.compile("AddTodo", &todo_schema()).unwrap();

        let err = validator.validate("AddTodo", &json!({})).unwrap_err();
        assert_eq!(err.message, "AddTodo");
        assert!(err.has_issue("/title", "required"));
        assert!(err.issues.iter().all(|issue| issue.message == "AddTodo"));
    }

    #[test]
    fn test_type_issue_path() {
        let cache = ValidatorCache::default();
        let validator = cache.compile("AddTodo", &todo_schema()).unwrap();

        let err = validator.validate("AddTodo", &json!({"title": 5})).unwrap_err();
        assert!(err.has_issue("/title", "type"));
    }

    #[test]
    fn test_invalid_schema_is_compile_error() {
        let cache = ValidatorCache::default();
        let err = cache
            .compile("Broken", &json!({"type": "object", "minProperties": "three"}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Compile { schema, .. } if schema == "Broken"));
        assert!(cache.is_empty());
    }
}
