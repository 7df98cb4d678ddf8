//! Registry contents
//!
//! [`RegistryConfig`] is the serializable modeling metadata (what `INIT`
//! carries and what `export` returns). [`RegistryState`] pairs it with the
//! factories compiled from it; readers only ever see complete states.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::interpreter::Rule;
use crate::messaging::{MessageDescriptor, MessageFactory, MessageKind};
use crate::schema::DefinitionRegistry;

/// Runtime information for a command, event, query or value object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    /// Message descriptor
    pub desc: MessageDescriptor,
    /// Rules applied to a payload before validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factory: Vec<Rule>,
    /// Raw JSON schema (may contain `$ref`s)
    pub schema: Value,
    /// Opaque form hints for the UI layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
}

impl RuntimeInfo {
    /// Runtime info without factory rules or UI hints.
    pub fn new(desc: MessageDescriptor, schema: Value) -> Self {
        Self {
            desc,
            factory: Vec::new(),
            schema,
            ui_schema: None,
        }
    }
}

/// Aggregate description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDescription {
    /// Aggregate name
    pub name: String,
    /// State field holding the aggregate identifier
    pub identifier: String,
    /// Name of the information describing the aggregate state
    pub state: String,
    /// Owning service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Event policy with the rules it evaluates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDescription {
    /// Policy name
    pub name: String,
    /// Rules evaluated when the event occurs
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Owning service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// A schema definition added by `ADD_TYPE`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    /// Registry key (`/definitions/...`)
    pub definition_id: String,
    /// Definition schema
    pub schema: Value,
}

/// Serializable modeling metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Page definitions, opaque to the engine
    pub pages: BTreeMap<String, Value>,
    /// Commands by name
    pub commands: BTreeMap<String, RuntimeInfo>,
    /// Business rules by command name
    pub command_handlers: BTreeMap<String, Vec<Rule>>,
    /// Events by name
    pub events: BTreeMap<String, RuntimeInfo>,
    /// Value objects, states and state lists by name
    pub information: BTreeMap<String, RuntimeInfo>,
    /// Queries by name
    pub queries: BTreeMap<String, RuntimeInfo>,
    /// Query resolver configuration, opaque to the engine
    pub resolvers: BTreeMap<String, Value>,
    /// Aggregates by name
    pub aggregates: BTreeMap<String, AggregateDescription>,
    /// Reducer rules by aggregate, then event
    pub apply_rules: BTreeMap<String, BTreeMap<String, Vec<Rule>>>,
    /// Policies by event, then policy name
    pub event_policies: BTreeMap<String, BTreeMap<String, PolicyDescription>>,
    /// Shared schema definitions
    pub schema_definitions: DefinitionRegistry,
}

impl RegistryConfig {
    /// Sub-registry holding messages of `kind`.
    pub fn infos(&self, kind: MessageKind) -> &BTreeMap<String, RuntimeInfo> {
        match kind {
            MessageKind::Command => &self.commands,
            MessageKind::Event => &self.events,
            MessageKind::ValueObject => &self.information,
            MessageKind::Query => &self.queries,
        }
    }

    /// Mutable sub-registry holding messages of `kind`.
    pub fn infos_mut(&mut self, kind: MessageKind) -> &mut BTreeMap<String, RuntimeInfo> {
        match kind {
            MessageKind::Command => &mut self.commands,
            MessageKind::Event => &mut self.events,
            MessageKind::ValueObject => &mut self.information,
            MessageKind::Query => &mut self.queries,
        }
    }
}

pub(crate) type FactoryKey = (MessageKind, String);

/// Complete registry state: metadata plus compiled factories
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    pub(crate) config: RegistryConfig,
    pub(crate) factories: HashMap<FactoryKey, Arc<MessageFactory>>,
    pub(crate) revision: u64,
}

impl RegistryState {
    /// Serializable metadata
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of actions applied since the store was created
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Runtime info of a message
    pub fn info(&self, kind: MessageKind, name: &str) -> Option<&RuntimeInfo> {
        self.config.infos(kind).get(name)
    }

    /// Compiled factory of a message
    pub fn factory(&self, kind: MessageKind, name: &str) -> Option<&Arc<MessageFactory>> {
        self.factories.get(&(kind, name.to_string()))
    }

    /// Registered names of a kind, sorted
    pub fn names(&self, kind: MessageKind) -> Vec<&str> {
        self.config.infos(kind).keys().map(String::as_str).collect()
    }

    /// Kind under which `name` is registered, if any
    pub fn kind_of(&self, name: &str) -> Option<MessageKind> {
        [
            MessageKind::Command,
            MessageKind::Event,
            MessageKind::Query,
            MessageKind::ValueObject,
        ]
        .into_iter()
        .find(|kind| self.config.infos(*kind).contains_key(name))
    }

    /// Aggregate description
    pub fn aggregate(&self, name: &str) -> Option<&AggregateDescription> {
        self.config.aggregates.get(name)
    }

    /// Reducer rules of an aggregate for an event
    pub fn apply_rules(&self, aggregate: &str, event: &str) -> Option<&[Rule]> {
        self.config
            .apply_rules
            .get(aggregate)
            .and_then(|reducers| reducers.get(event))
            .map(Vec::as_slice)
    }

    /// Business rules of a command
    pub fn business_rules(&self, command: &str) -> Option<&[Rule]> {
        self.config.command_handlers.get(command).map(Vec::as_slice)
    }

    /// Policies listening to an event, ordered by policy name
    pub fn policies_for(&self, event: &str) -> impl Iterator<Item = &PolicyDescription> {
        self.config
            .event_policies
            .get(event)
            .into_iter()
            .flat_map(|policies| policies.values())
    }

    /// Shared schema definitions
    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.config.schema_definitions
    }

    /// Page definition
    pub fn page(&self, name: &str) -> Option<&Value> {
        self.config.pages.get(name)
    }

    /// Resolver configuration of a query
    pub fn resolver(&self, query: &str) -> Option<&Value> {
        self.config.resolvers.get(query)
    }

    /// Factory validating the state of an aggregate
    pub fn aggregate_state_factory(&self, aggregate: &str) -> Option<&Arc<MessageFactory>> {
        let desc = self.aggregate(aggregate)?;
        self.factory(MessageKind::ValueObject, &desc.state)
    }
}
