//! Registry ingestion protocol
//!
//! Actions are produced by the modeling-metadata layer and consumed by the
//! [`RegistryStore`](super::registry::RegistryStore). Their JSON form uses a
//! `type` tag (`"ADD_COMMAND"`, ...) with camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::{AggregateDescription, PolicyDescription, RegistryConfig, RuntimeInfo, SchemaDefinition};
use crate::interpreter::Rule;

/// Discriminated union of registry mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RegistryAction {
    /// Replace the whole registry
    Init {
        /// Complete metadata
        payload: RegistryConfig,
    },
    /// Register a page definition
    AddPage {
        /// Page name
        name: String,
        /// Opaque page definition
        page: Value,
    },
    /// Register a command
    AddCommand {
        /// Command name
        name: String,
        /// Command runtime info
        command: RuntimeInfo,
    },
    /// Register a value object together with its schema definition
    AddType {
        /// Information name
        name: String,
        /// Information runtime info
        information: RuntimeInfo,
        /// Definition made available to `$ref`s
        definition: SchemaDefinition,
    },
    /// Register a query and its resolver
    AddQuery {
        /// Query name
        name: String,
        /// Query runtime info
        query: RuntimeInfo,
        /// Opaque resolver configuration
        resolver: Value,
    },
    /// Register an aggregate and the business rules of one of its commands
    AddAggregate {
        /// Aggregate name
        name: String,
        /// Command handled by the aggregate
        command: String,
        /// Aggregate description
        aggregate: AggregateDescription,
        /// Business rules of the command
        #[serde(default)]
        business_rules: Vec<Rule>,
    },
    /// Register an aggregate event and its reducer rules
    AddAggregateEvent {
        /// Event name
        name: String,
        /// Owning aggregate
        aggregate: String,
        /// Event runtime info
        event: RuntimeInfo,
        /// Reducer rules; empty means the default payload mapping
        #[serde(default)]
        reducer: Vec<Rule>,
    },
    /// Register a policy reacting to an event
    AddEventPolicy {
        /// Policy name
        name: String,
        /// Event the policy listens to
        event: String,
        /// Policy description and rules
        desc: PolicyDescription,
    },
}

impl RegistryAction {
    /// Wire tag of the action
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryAction::Init { .. } => "INIT",
            RegistryAction::AddPage { .. } => "ADD_PAGE",
            RegistryAction::AddCommand { .. } => "ADD_COMMAND",
            RegistryAction::AddType { .. } => "ADD_TYPE",
            RegistryAction::AddQuery { .. } => "ADD_QUERY",
            RegistryAction::AddAggregate { .. } => "ADD_AGGREGATE",
            RegistryAction::AddAggregateEvent { .. } => "ADD_AGGREGATE_EVENT",
            RegistryAction::AddEventPolicy { .. } => "ADD_EVENT_POLICY",
        }
    }

    /// Name the action registers (`None` for `INIT`)
    pub fn name(&self) -> Option<&str> {
        match self {
            RegistryAction::Init { .. } => None,
            RegistryAction::AddPage { name, .. }
            | RegistryAction::AddCommand { name, .. }
            | RegistryAction::AddType { name, .. }
            | RegistryAction::AddQuery { name, .. }
            | RegistryAction::AddAggregate { name, .. }
            | RegistryAction::AddAggregateEvent { name, .. }
            | RegistryAction::AddEventPolicy { name, .. } => Some(name),
        }
    }
}
