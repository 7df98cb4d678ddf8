use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A node of the rule language. The `type` field selects the variant; unknown
/// types and unknown fields are rejected when the document is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Rule {
    /// Boolean test. Without `then`/`else` it guards the enclosing sequence and
    /// stops it when false; with them it branches.
    Condition {
        /// Predicate over context fields.
        when: Expr,
        /// Rules run when the predicate holds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        then: Option<Vec<Rule>>,
        /// Rules run when the predicate fails.
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Rule>>,
    },
    /// Write a computed value to a path of the emerging state.
    Assign {
        /// Target path, optionally prefixed with `state.`.
        to: String,
        /// Value to write.
        value: Expr,
    },
    /// Structural copy of a source object onto the emerging state.
    MapPayload {
        /// Source path (defaults to `payload`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        /// Target path (defaults to the state root).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        /// Restrict the copy to these source fields.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        only: Option<Vec<String>>,
        /// Source field to target field renames.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        rename: BTreeMap<String, String>,
        /// Values for target fields the source does not provide.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        defaults: Map<String, Value>,
        /// Marks the zero-configuration fallback rule.
        #[serde(default, rename = "default", skip_serializing_if = "std::ops::Not::not")]
        is_default: bool,
    },
    /// Record a call to a host capability.
    Execute {
        /// Capability name.
        capability: String,
        /// Arguments resolved against the context.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        args: BTreeMap<String, Expr>,
    },
    /// Ordered composition; later writes win.
    Sequence {
        /// Child rules.
        rules: Vec<Rule>,
    },
}

/// Value expressions used by conditions, assignments and capability arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Constant JSON value.
    Literal(Value),
    /// Dotted path into the context (`payload.title`, `state.items.0`).
    Field(String),
    /// Whether a path exists.
    Exists(String),
    /// Equality (numbers compare by value).
    Eq(Box<Expr>, Box<Expr>),
    /// Inequality.
    Ne(Box<Expr>, Box<Expr>),
    /// Greater than.
    Gt(Box<Expr>, Box<Expr>),
    /// Greater than or equal.
    Gte(Box<Expr>, Box<Expr>),
    /// Less than.
    Lt(Box<Expr>, Box<Expr>),
    /// Less than or equal.
    Lte(Box<Expr>, Box<Expr>),
    /// Membership: element of array, substring, or object key.
    In(Box<Expr>, Box<Expr>),
    /// Logical conjunction, short-circuiting.
    And(Vec<Expr>),
    /// Logical disjunction, short-circuiting.
    Or(Vec<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
    /// String (or array) concatenation.
    Concat(Vec<Expr>),
    /// Numeric addition.
    Add(Box<Expr>, Box<Expr>),
    /// Numeric subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// First non-null operand; missing fields count as null.
    Coalesce(Vec<Expr>),
    /// Object built from evaluated members.
    Object(BTreeMap<String, Expr>),
    /// Array built from evaluated items.
    List(Vec<Expr>),
}

impl Expr {
    /// Literal shorthand.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Field reference shorthand.
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    /// Equality shorthand.
    pub fn equals(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }
}

impl Rule {
    /// Guard that stops the enclosing sequence when `when` is false.
    pub fn guard(when: Expr) -> Self {
        Rule::Condition {
            when,
            then: None,
            otherwise: None,
        }
    }

    /// Assignment shorthand.
    pub fn assign(to: impl Into<String>, value: Expr) -> Self {
        Rule::Assign {
            to: to.into(),
            value,
        }
    }

    /// Sequence shorthand.
    pub fn sequence(rules: Vec<Rule>) -> Self {
        Rule::Sequence { rules }
    }

    /// Capability call shorthand.
    pub fn execute(capability: impl Into<String>, args: BTreeMap<String, Expr>) -> Self {
        Rule::Execute {
            capability: capability.into(),
            args,
        }
    }
}

/// The fallback reducer: copy every payload field onto the state.
pub fn always_map_payload() -> Rule {
    Rule::MapPayload {
        from: None,
        to: None,
        only: None,
        rename: BTreeMap::new(),
        defaults: Map::new(),
        is_default: true,
    }
}

/// Whether the rule is a default fallback.
pub fn is_default_rule(rule: &Rule) -> bool {
    matches!(rule, Rule::MapPayload { is_default: true, .. })
}
