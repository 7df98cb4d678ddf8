//! Error types for the event engine
//!
//! Domain errors use thiserror; the storage and CLI boundaries convert them
//! into `anyhow` with context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interpreter::RuleError;
use crate::messaging::MessageKind;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Schema resolution or compilation errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Message construction errors
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Rule evaluation errors
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Registry ingestion errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No message of the given kind is registered under the name
    #[error("Unknown {kind} '{name}'")]
    UnknownMessage {
        /// Kind that was looked up
        kind: MessageKind,
        /// Requested message name
        name: String,
    },

    /// Aggregate has no registered apply rules for the event
    #[error("Aggregate '{aggregate}' has no apply rules for event '{event}'")]
    UnknownAggregate {
        /// Aggregate name
        aggregate: String,
        /// Event name
        event: String,
    },
}

/// Schema resolution and compilation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A `$ref` points at a definition that is not registered
    #[error("Schema '{schema}' references unknown definition '{reference}'")]
    MissingReference {
        /// Unresolved reference
        reference: String,
        /// Name of the schema holding the reference
        schema: String,
    },

    /// Definitions reference each other in a loop
    #[error("Schema '{schema}' contains a reference cycle: {}", .cycle.join(" -> "))]
    CyclicReference {
        /// Name of the schema being resolved
        schema: String,
        /// References in expansion order, ending with the repeated one
        cycle: Vec<String>,
    },

    /// A local `#/...` pointer does not address a node in the document
    #[error("Schema '{schema}' has an invalid local pointer '{pointer}'")]
    InvalidPointer {
        /// Name of the schema being resolved
        schema: String,
        /// Offending pointer
        pointer: String,
    },

    /// The resolved schema was rejected by the compiler
    #[error("Schema '{schema}' failed to compile: {reason}")]
    Compile {
        /// Name of the schema being compiled
        schema: String,
        /// Compiler diagnostic
        reason: String,
    },
}

/// Convenience result alias for schema operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// A single failing field reported by a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Name of the message whose payload failed
    pub message: String,
    /// JSON pointer to the failing field (`""` is the payload root)
    pub path: String,
    /// Schema keyword that failed (`required`, `type`, ...)
    pub keyword: String,
    /// Human-readable description
    pub detail: String,
}

/// Payload rejected by a compiled validator
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Validation for \"{message}\" failed: {}", summarize(.issues))]
pub struct ValidationError {
    /// Name of the message or value object being validated
    pub message: String,
    /// One entry per failing field path
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Whether any issue points at `path` for the given keyword.
    pub fn has_issue(&self, path: &str, keyword: &str) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.path == path && issue.keyword == keyword)
    }

    /// Failing field paths in report order.
    pub fn paths(&self) -> Vec<&str> {
        self.issues.iter().map(|issue| issue.path.as_str()).collect()
    }
}

fn summarize(issues: &[FieldIssue]) -> String {
    if issues.is_empty() {
        return "unknown reason".to_string();
    }
    issues
        .iter()
        .map(|issue| {
            if issue.path.is_empty() {
                issue.detail.clone()
            } else {
                format!("{}: {}", issue.path, issue.detail)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by a message factory invocation
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload failed schema validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The init transform could not prepare the payload
    #[error("Initialization of \"{message}\" failed: {reason}")]
    Init {
        /// Message name
        message: String,
        /// Failure description
        reason: String,
    },
}

/// Convenience result alias for message construction
pub type MessageResult<T> = std::result::Result<T, MessageError>;

/// Registry ingestion errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Action conflicts with an existing registration
    #[error("Conflicting registration for '{name}': {detail}")]
    Conflict {
        /// Name being registered
        name: String,
        /// What is inconsistent
        detail: String,
    },

    /// A schema carried by the action could not be resolved or compiled
    #[error("Schema error while registering '{name}': {source}")]
    Schema {
        /// Name being registered
        name: String,
        /// Underlying schema error
        #[source]
        source: SchemaError,
    },

    /// Rules carried by the action can never evaluate successfully
    #[error("Invalid rules for '{name}': {source}")]
    Rules {
        /// Name being registered
        name: String,
        /// Underlying rule error
        #[source]
        source: RuleError,
    },
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_lists_fields() {
        let err = ValidationError {
            message: "AddTodo".to_string(),
            issues: vec![FieldIssue {
                message: "AddTodo".to_string(),
                path: "/title".to_string(),
                keyword: "required".to_string(),
                detail: "\"title\" is a required property".to_string(),
            }],
        };

        let text = err.to_string();
        assert!(text.contains("AddTodo"));
        assert!(text.contains("/title"));
        assert!(err.has_issue("/title", "required"));
        assert_eq!(err.paths(), vec!["/title"]);
    }

    #[test]
    fn test_cycle_display() {
        let err = SchemaError::CyclicReference {
            schema: "Node".to_string(),
            cycle: vec!["/a".to_string(), "/b".to_string(), "/a".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Schema 'Node' contains a reference cycle: /a -> /b -> /a"
        );
    }
}
