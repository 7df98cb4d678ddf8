use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a registered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Request to attempt a state change
    Command,
    /// Fact that already happened
    Event,
    /// Read-model value, state or state list ("information")
    ValueObject,
    /// Request for information
    Query,
}

impl MessageKind {
    /// Whether factories of this kind produce envelopes rather than bare values.
    pub fn is_envelope(self) -> bool {
        !matches!(self, MessageKind::ValueObject)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
            MessageKind::ValueObject => "information",
            MessageKind::Query => "query",
        };
        f.write_str(label)
    }
}

/// Description of a message known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDescriptor {
    /// Unique name within the kind
    pub name: String,
    /// Message kind
    pub kind: MessageKind,
    /// Whether the message targets an aggregate
    #[serde(default)]
    pub is_aggregate_bound: bool,
    /// Owning aggregate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_name: Option<String>,
    /// Payload field carrying the aggregate identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_identifier_field: Option<String>,
    /// Whether the value is a list
    #[serde(default)]
    pub is_list: bool,
    /// Whether the value carries its own identifier
    #[serde(default)]
    pub has_identifier: bool,
    /// Aggregate commands: whether the command creates a new aggregate
    #[serde(default)]
    pub new_aggregate: bool,
    /// State: identifier field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// State lists: identifier field of each item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_identifier: Option<String>,
    /// Queries: name of the information returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    /// Owning service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl MessageDescriptor {
    /// Plain descriptor of the given kind with every flag cleared.
    pub fn new(name: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_aggregate_bound: false,
            aggregate_name: None,
            aggregate_identifier_field: None,
            is_list: false,
            has_identifier: false,
            new_aggregate: false,
            identifier: None,
            item_identifier: None,
            returns: None,
            service: None,
        }
    }

    /// Bind the descriptor to an aggregate.
    pub fn for_aggregate(mut self, aggregate: impl Into<String>, identifier_field: impl Into<String>) -> Self {
        self.is_aggregate_bound = true;
        self.aggregate_name = Some(aggregate.into());
        self.aggregate_identifier_field = Some(identifier_field.into());
        self
    }

    /// Mark the value as identified by `field`.
    pub fn with_identifier(mut self, field: impl Into<String>) -> Self {
        self.has_identifier = true;
        self.identifier = Some(field.into());
        self
    }

    /// Mark the value as a list whose items are identified by `field`.
    pub fn as_list(mut self, item_identifier: impl Into<String>) -> Self {
        self.is_list = true;
        self.item_identifier = Some(item_identifier.into());
        self
    }
}
