use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ast::Rule;
use super::{RuleError, RuleResult};

/// Highest rule language version understood by this engine.
pub const RULE_LANGUAGE_VERSION: u32 = 1;

/// Versioned envelope around a list of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    /// Rule language version
    #[serde(default = "current_version")]
    pub version: u32,
    /// Top-level rules in registration order
    pub rules: Vec<Rule>,
}

fn current_version() -> u32 {
    RULE_LANGUAGE_VERSION
}

/// Load rules from a document value.
///
/// Accepts a bare array of rules, a single rule object, or a
/// `{"version": n, "rules": [...]}` document.
pub fn parse_rules(document: &Value) -> RuleResult<Vec<Rule>> {
    match document {
        Value::Array(_) => decode::<Vec<Rule>>(document),
        Value::Object(map) if map.contains_key("type") => Ok(vec![decode::<Rule>(document)?]),
        Value::Object(_) => {
            let doc = decode::<RuleDocument>(document)?;
            if doc.version == 0 || doc.version > RULE_LANGUAGE_VERSION {
                return Err(RuleError::UnsupportedVersion {
                    found: doc.version,
                    supported: RULE_LANGUAGE_VERSION,
                });
            }
            Ok(doc.rules)
        }
        other => Err(RuleError::Parse(format!(
            "expected a rule, a list of rules or a rule document, found {}",
            super::value::type_name(other)
        ))),
    }
}

/// Parse rules from JSON text.
pub fn parse_rules_str(text: &str) -> RuleResult<Vec<Rule>> {
    let document: Value =
        serde_json::from_str(text).map_err(|err| RuleError::Parse(err.to_string()))?;
    parse_rules(&document)
}

/// Wrap rules into a document of the current version.
pub fn to_document(rules: &[Rule]) -> Value {
    serde_json::json!({
        "version": RULE_LANGUAGE_VERSION,
        "rules": rules,
    })
}

fn decode<T: serde::de::DeserializeOwned>(document: &Value) -> RuleResult<T> {
    T::deserialize(document).map_err(|err| RuleError::Parse(err.to_string()))
}
