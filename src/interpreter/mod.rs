//! Declarative rule interpreter.
//!
//! Rules describe "when this message arrives, compute that state" as data: a
//! small tree of conditions, assignments, payload mappings, deferred
//! capability calls and sequences. Evaluation is a single depth-first pass over
//! an immutable context and never performs side effects itself; `execute`
//! nodes come back as [`Instruction`]s for the host to run.

/// Rule and expression syntax.
pub mod ast;
/// Capability catalogs and the host that runs deferred instructions.
pub mod host;
/// Loading versioned rule documents.
pub mod parser;
/// Rule evaluation.
pub mod runtime;
/// Path lookups and value helpers.
pub mod value;

pub use ast::{Expr, Rule, always_map_payload, is_default_rule};
pub use host::{CapabilityCatalog, CapabilityHost, Instruction, NoCapabilities};
pub use parser::{RULE_LANGUAGE_VERSION, RuleDocument, parse_rules, parse_rules_str, to_document};
pub use runtime::{Evaluation, RuleContext, evaluate};

use thiserror::Error;

/// Convenience result alias for interpreter operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// Errors surfaced while loading or evaluating rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A rule reads a context field that does not exist.
    #[error("unknown context field '{0}'")]
    UnknownField(String),

    /// An `execute` node names a capability the host does not provide.
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    /// Nothing matched and no default rule was available.
    #[error("no rule matched and no default rule exists")]
    NoMatchingRule,

    /// A condition produced a non-boolean value.
    #[error("condition did not evaluate to a boolean, got {0}")]
    NotBoolean(String),

    /// An operator received operands of the wrong shape.
    #[error("type mismatch in '{op}': {detail}")]
    TypeMismatch {
        /// Operator name
        op: String,
        /// What was wrong
        detail: String,
    },

    /// An assignment target cannot be written.
    #[error("cannot write to path '{0}'")]
    InvalidPath(String),

    /// The rule document declares a language version this engine cannot run.
    #[error("unsupported rule language version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Declared version
        found: u32,
        /// Highest supported version
        supported: u32,
    },

    /// The rule document is malformed or uses an unknown node type.
    #[error("invalid rule document: {0}")]
    Parse(String),

    /// Payload fields that the state shape does not declare.
    #[error("payload fields {} are not part of the state shape", .0.join(", "))]
    UnmappedFields(Vec<String>),
}
