//! Engine orchestrator and public API
//!
//! This module provides the [`Engine`] that ties the registry store, the
//! validator cache and the rule interpreter together, and exposes the
//! operations a generator or an interactive interpreter needs: building
//! registered messages by name and computing state from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod action;
pub mod error;
pub mod registry;
pub mod state;
pub mod storage;

use crate::interpreter::{
    CapabilityCatalog, Evaluation, Instruction, NoCapabilities, RuleContext, RuleError, evaluate,
    is_default_rule,
};
use crate::messaging::{Envelope, MessageFactory, MessageKind, Meta};
use crate::schema::{SchemaDraft, ValidatorCache, property_names};

pub use action::RegistryAction;
pub use error::{EngineError, Result};
use error::MessageError;
pub use registry::RegistryStore;
pub use state::{
    AggregateDescription, PolicyDescription, RegistryConfig, RegistryState, RuntimeInfo,
    SchemaDefinition,
};

/// How the default payload-mapping rule treats payload fields the aggregate
/// state schema does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultMappingPolicy {
    /// Copy every field; state validation decides what is acceptable
    #[default]
    BestEffort,
    /// Reject events carrying fields the state schema does not declare
    Strict,
}

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// JSON Schema draft used to compile validators
    pub draft: SchemaDraft,

    /// Behaviour of the default payload-mapping rule
    pub default_mapping: DefaultMappingPolicy,

    /// Validate computed aggregate state against its information schema
    pub validate_state: bool,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            draft: SchemaDraft::default(),
            default_mapping: DefaultMappingPolicy::default(),
            validate_state: true,
            debug: false,
        }
    }
}

/// The engine orchestrator
///
/// Cheap to clone; clones share the registry store.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<RegistryStore>,
}

impl Engine {
    /// Create an engine with an empty registry
    pub fn new(config: EngineConfig) -> Self {
        let validators = Arc::new(ValidatorCache::new(config.draft));
        let store = Arc::new(RegistryStore::with_validators(validators));
        Self { config, store }
    }

    /// Create an engine reading from an existing store
    ///
    /// The store's validator cache decides the draft; `config.draft` is
    /// overwritten with it so [`Engine::config`] reports what is in effect.
    pub fn with_store(mut config: EngineConfig, store: Arc<RegistryStore>) -> Self {
        let draft = store.validators().draft();
        if config.draft != draft {
            tracing::warn!(requested = ?config.draft, store = ?draft, "using the store's schema draft");
            config.draft = draft;
        }
        Self { config, store }
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the registry store
    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Current registry snapshot
    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.store.snapshot()
    }

    /// Apply one registry action
    pub fn dispatch(&self, action: RegistryAction) -> Result<u64> {
        Ok(self.store.dispatch(action)?)
    }

    /// Apply a batch of registry actions as one unit
    pub fn load(&self, actions: Vec<RegistryAction>) -> Result<u64> {
        Ok(self.store.dispatch_all(actions)?)
    }

    /// Factory registered under `name` for `kind`
    pub fn factory(&self, kind: MessageKind, name: &str) -> Result<Arc<MessageFactory>> {
        self.snapshot()
            .factory(kind, name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownMessage {
                kind,
                name: name.to_string(),
            })
    }

    /// Build a validated command envelope
    pub fn make_command(&self, name: &str, payload: Value, meta: Option<Meta>) -> Result<Envelope> {
        Ok(self.factory(MessageKind::Command, name)?.make(payload, meta)?)
    }

    /// Build a validated event envelope
    pub fn make_event(&self, name: &str, payload: Value, meta: Option<Meta>) -> Result<Envelope> {
        Ok(self.factory(MessageKind::Event, name)?.make(payload, meta)?)
    }

    /// Build a validated query envelope
    pub fn make_query(&self, name: &str, payload: Value, meta: Option<Meta>) -> Result<Envelope> {
        Ok(self.factory(MessageKind::Query, name)?.make(payload, meta)?)
    }

    /// Build a validated value object, state or state list
    pub fn make_information(&self, name: &str, value: Value) -> Result<Value> {
        Ok(self.factory(MessageKind::ValueObject, name)?.make_value(value)?)
    }

    /// Compute the state of `aggregate` after `event`.
    ///
    /// Evaluates the aggregate's reducer rules for the event against the
    /// prior state. When the aggregate's state information is registered and
    /// `validate_state` is on, the result must satisfy its schema.
    pub fn apply_event(&self, aggregate: &str, event: &Envelope, prior: Option<Value>) -> Result<Value> {
        let snapshot = self.snapshot();
        let rules = snapshot
            .apply_rules(aggregate, &event.name)
            .ok_or_else(|| EngineError::UnknownAggregate {
                aggregate: aggregate.to_string(),
                event: event.name.clone(),
            })?;
        let state_factory = snapshot.aggregate_state_factory(aggregate);

        if self.config.default_mapping == DefaultMappingPolicy::Strict
            && rules.iter().any(is_default_rule)
        {
            if let Some(factory) = state_factory {
                check_mapped(&event.payload, factory.schema())?;
            }
        }

        let context = RuleContext::from_envelope(event, prior);
        let evaluation = evaluate(rules, &context, &NoCapabilities)?;
        let state = evaluation.state.unwrap_or_else(|| Value::Object(Map::new()));

        if self.config.validate_state {
            if let Some(factory) = state_factory {
                factory
                    .validator()
                    .validate(factory.name(), &state)
                    .map_err(MessageError::from)?;
            }
        }

        tracing::debug!(aggregate, event = %event.name, matched = evaluation.matched, "applied event");
        Ok(state)
    }

    /// Fold `events` into the state of `aggregate`, starting from `prior`.
    pub fn fold_events<'e, I>(&self, aggregate: &str, events: I, prior: Option<Value>) -> Result<Option<Value>>
    where
        I: IntoIterator<Item = &'e Envelope>,
    {
        let mut state = prior;
        for event in events {
            state = Some(self.apply_event(aggregate, event, state)?);
        }
        Ok(state)
    }

    /// Evaluate the business rules of a command against the aggregate's prior state.
    pub fn handle_command(
        &self,
        command: &Envelope,
        prior: Option<Value>,
        capabilities: &dyn CapabilityCatalog,
    ) -> Result<Evaluation> {
        let snapshot = self.snapshot();
        let rules = snapshot
            .business_rules(&command.name)
            .ok_or_else(|| EngineError::UnknownMessage {
                kind: MessageKind::Command,
                name: command.name.clone(),
            })?;

        let evaluation = evaluate(rules, &RuleContext::from_envelope(command, prior), capabilities)?;
        tracing::debug!(
            command = %command.name,
            matched = evaluation.matched,
            effects = evaluation.effects.len(),
            "handled command"
        );
        Ok(evaluation)
    }

    /// Instructions produced by every policy listening to `event`, in policy-name order.
    ///
    /// A policy whose rules do not match contributes nothing.
    pub fn policy_effects(
        &self,
        event: &Envelope,
        capabilities: &dyn CapabilityCatalog,
    ) -> Result<Vec<Instruction>> {
        let snapshot = self.snapshot();
        let context = RuleContext::from_envelope(event, None);
        let mut effects = Vec::new();

        for policy in snapshot.policies_for(&event.name) {
            match evaluate(&policy.rules, &context, capabilities) {
                Ok(evaluation) => {
                    tracing::debug!(policy = %policy.name, effects = evaluation.effects.len(), "policy fired");
                    effects.extend(evaluation.effects);
                }
                Err(RuleError::NoMatchingRule) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(effects)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn check_mapped(payload: &Value, state_schema: &Value) -> Result<()> {
    let known = property_names(state_schema);
    let Value::Object(fields) = payload else {
        return Ok(());
    };
    if known.is_empty() {
        return Ok(());
    }

    let unmapped: Vec<String> = fields
        .keys()
        .filter(|key| !known.contains(key))
        .cloned()
        .collect();
    if unmapped.is_empty() {
        Ok(())
    } else {
        Err(RuleError::UnmappedFields(unmapped).into())
    }
}
