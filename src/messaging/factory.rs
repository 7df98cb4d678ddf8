use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::descriptor::MessageKind;
use super::envelope::{Envelope, Meta};
use crate::runtime::error::{MessageError, MessageResult, SchemaResult};
use crate::schema::{CompiledValidator, DefinitionRegistry, ValidatorCache, resolve};

/// Transform applied to a payload before validation (defaulting fields, ids, ...)
pub type InitFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Output of [`MessageFactory::call`]
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Commands, events and queries are wrapped into envelopes
    Envelope(Envelope),
    /// Value objects are returned as the validated value itself
    Value(Value),
}

/// Validating constructor for a named message
#[derive(Clone)]
pub struct MessageFactory {
    name: String,
    kind: MessageKind,
    validator: Arc<CompiledValidator>,
    init: Option<InitFn>,
}

impl MessageFactory {
    /// Resolve and compile `schema`, producing a factory for `name`.
    ///
    /// The resolved schema goes through the shared `cache`, so registering the
    /// same identity again replaces the previous validator instead of adding a
    /// second one.
    pub fn new(
        kind: MessageKind,
        name: impl Into<String>,
        schema: &Value,
        definitions: &DefinitionRegistry,
        cache: &ValidatorCache,
    ) -> SchemaResult<Self> {
        let name = name.into();
        let resolved = resolve(&name, schema, definitions)?;
        let validator = cache.compile(&name, &resolved)?;

        Ok(Self {
            name,
            kind,
            validator,
            init: None,
        })
    }

    /// Factory producing command envelopes
    pub fn command(
        name: impl Into<String>,
        schema: &Value,
        definitions: &DefinitionRegistry,
        cache: &ValidatorCache,
    ) -> SchemaResult<Self> {
        Self::new(MessageKind::Command, name, schema, definitions, cache)
    }

    /// Factory producing event envelopes
    pub fn event(
        name: impl Into<String>,
        schema: &Value,
        definitions: &DefinitionRegistry,
        cache: &ValidatorCache,
    ) -> SchemaResult<Self> {
        Self::new(MessageKind::Event, name, schema, definitions, cache)
    }

    /// Factory producing query envelopes
    pub fn query(
        name: impl Into<String>,
        schema: &Value,
        definitions: &DefinitionRegistry,
        cache: &ValidatorCache,
    ) -> SchemaResult<Self> {
        Self::new(MessageKind::Query, name, schema, definitions, cache)
    }

    /// Factory returning validated bare values
    pub fn value_object(
        name: impl Into<String>,
        schema: &Value,
        definitions: &DefinitionRegistry,
        cache: &ValidatorCache,
    ) -> SchemaResult<Self> {
        Self::new(MessageKind::ValueObject, name, schema, definitions, cache)
    }

    /// Attach an init transform applied before every validation.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Message name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Resolved schema used for validation
    pub fn schema(&self) -> &Value {
        self.validator.schema()
    }

    /// Compiled validator backing this factory
    pub fn validator(&self) -> &Arc<CompiledValidator> {
        &self.validator
    }

    /// Apply the init transform and validate, returning the accepted value.
    pub fn validate(&self, payload: Value) -> MessageResult<Value> {
        let payload = match &self.init {
            Some(init) => init(payload).map_err(|reason| MessageError::Init {
                message: self.name.clone(),
                reason,
            })?,
            None => payload,
        };

        self.validator.validate(&self.name, &payload)?;
        Ok(payload)
    }

    /// Build an envelope with a fresh identifier and the current time.
    pub fn make(&self, payload: Value, meta: Option<Meta>) -> MessageResult<Envelope> {
        self.make_with(payload, meta, None, None)
    }

    /// Build an envelope, optionally pinning identifier and timestamp for replay.
    pub fn make_with(
        &self,
        payload: Value,
        meta: Option<Meta>,
        uuid: Option<Uuid>,
        created_at: Option<DateTime<Utc>>,
    ) -> MessageResult<Envelope> {
        let payload = self.validate(payload)?;

        Ok(Envelope {
            uuid: uuid.unwrap_or_else(Uuid::new_v4),
            name: self.name.clone(),
            payload,
            meta: meta.unwrap_or_default(),
            created_at: created_at.unwrap_or_else(Utc::now),
        })
    }

    /// Validate a value object and return it unwrapped.
    pub fn make_value(&self, data: Value) -> MessageResult<Value> {
        self.validate(data)
    }

    /// Produce whatever this factory's kind produces.
    pub fn call(&self, payload: Value) -> MessageResult<Message> {
        if self.kind.is_envelope() {
            self.make(payload, None).map(Message::Envelope)
        } else {
            self.make_value(payload).map(Message::Value)
        }
    }
}

impl fmt::Display for MessageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for MessageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFactory")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("identity", &self.validator.identity())
            .field("init", &self.init.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::error::SchemaError;
    use serde_json::json;

    fn add_todo_schema() -> Value {
        json!({
            "type": "object",
            "required": ["title"],
            "properties": {"title": {"type": "string"}}
        })
    }

    #[test]
    fn test_command_envelope() {
        let cache = ValidatorCache::default();
        let factory =
            MessageFactory::command("AddTodo", &add_todo_schema(), &DefinitionRegistry::new(), &cache)
                .unwrap();

        let envelope = factory.make(json!({"title": "Buy milk"}), None).unwrap();
        assert_eq!(envelope.name, "AddTodo");
        assert_eq!(envelope.payload["title"], "Buy milk");
        assert!(envelope.meta.is_empty());
        assert_eq!(factory.to_string(), "AddTodo");
    }

    #[test]
    fn test_missing_required_field() {
        let cache = ValidatorCache::default();
        let factory =
            MessageFactory::command("AddTodo", &add_todo_schema(), &DefinitionRegistry::new(), &cache)
                .unwrap();

        match factory.make(json!({}), None) {
            Err(MessageError::Validation(err)) => {
                assert_eq!(err.message, "AddTodo");
                assert!(err.has_issue("/title", "required"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_pinned_identity_for_replay() {
        let cache = ValidatorCache::default();
        let factory =
            MessageFactory::command("AddTodo", &add_todo_schema(), &DefinitionRegistry::new(), &cache)
                .unwrap();
        let id = Uuid::new_v4();
        let at = Utc::now();

        let envelope = factory
            .make_with(json!({"title": "x"}), None, Some(id), Some(at))
            .unwrap();
        assert_eq!(envelope.uuid, id);
        assert_eq!(envelope.created_at, at);
    }

    #[test]
    fn test_value_object_init_runs_before_validation() {
        let cache = ValidatorCache::default();
        let schema = json!({
            "type": "object",
            "required": ["id", "title"],
            "properties": {"id": {"type": "string"}, "title": {"type": "string"}}
        });
        let factory = MessageFactory::value_object("Todo", &schema, &DefinitionRegistry::new(), &cache)
            .unwrap()
            .with_init(|mut data| {
                if let Value::Object(map) = &mut data {
                    map.entry("id").or_insert_with(|| json!("generated"));
                }
                Ok(data)
            });

        let value = factory.make_value(json!({"title": "Buy milk"})).unwrap();
        assert_eq!(value, json!({"id": "generated", "title": "Buy milk"}));
        assert!(matches!(factory.call(json!({"title": "t"})), Ok(Message::Value(_))));
    }

    #[test]
    fn test_init_failure_is_reported() {
        let cache = ValidatorCache::default();
        let factory = MessageFactory::value_object(
            "Title",
            &json!({"type": "string"}),
            &DefinitionRegistry::new(),
            &cache,
        )
        .unwrap()
        .with_init(|_| Err("no title source".to_string()));

        assert!(matches!(
            factory.make_value(json!("x")),
            Err(MessageError::Init { message, .. }) if message == "Title"
        ));
    }

    #[test]
    fn test_unresolvable_reference_aborts_construction() {
        let cache = ValidatorCache::default();
        let schema = json!({"type": "object", "properties": {"owner": {"$ref": "/definitions/User"}}});

        let err = MessageFactory::command("AssignTodo", &schema, &DefinitionRegistry::new(), &cache)
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingReference { .. }));
        assert!(cache.is_empty());
    }
}
