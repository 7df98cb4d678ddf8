use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::ast::{Expr, Rule, is_default_rule};
use super::host::{CapabilityCatalog, Instruction};
use super::value::{compare, ensure_object, loose_eq, lookup, split_path, target_segments, to_text, type_name, write_path};
use super::{RuleError, RuleResult};
use crate::messaging::Envelope;

/// Immutable input of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleContext {
    /// Triggering message payload
    pub payload: Value,
    /// Prior aggregate state, if any
    pub state: Option<Value>,
    /// Invocation metadata
    pub meta: Value,
}

impl RuleContext {
    /// Context with only a payload.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            state: None,
            meta: Value::Object(Map::new()),
        }
    }

    /// Context for a message envelope and optional prior state.
    pub fn from_envelope(envelope: &Envelope, state: Option<Value>) -> Self {
        Self {
            payload: envelope.payload.clone(),
            state,
            meta: envelope.meta_object(),
        }
    }

    /// Attach prior state.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Emerging state; `None` when there was no prior state and nothing was written
    pub state: Option<Value>,
    /// Deferred capability calls in declaration order
    pub effects: Vec<Instruction>,
    /// Number of top-level non-default rules that matched
    pub matched: usize,
}

/// Evaluate top-level `rules` against `context`.
///
/// Default rules run first as a base layer; the remaining rules then run in
/// registration order and overwrite it. If no rule matches and no default is
/// present the evaluation fails. On error nothing of the emerging state is
/// returned.
pub fn evaluate(
    rules: &[Rule],
    context: &RuleContext,
    capabilities: &dyn CapabilityCatalog,
) -> RuleResult<Evaluation> {
    let mut evaluator = Evaluator {
        context,
        capabilities,
        output: context.state.clone().unwrap_or(Value::Null),
        effects: Vec::new(),
    };

    let (defaults, specific): (Vec<&Rule>, Vec<&Rule>) =
        rules.iter().partition(|rule| is_default_rule(rule));

    for rule in &defaults {
        evaluator.run(rule)?;
    }

    let mut matched = 0;
    for rule in &specific {
        if evaluator.run(rule)? == Flow::Applied {
            matched += 1;
        }
    }

    if matched == 0 && defaults.is_empty() {
        return Err(RuleError::NoMatchingRule);
    }

    let state = match (&context.state, evaluator.output) {
        (None, Value::Null) => None,
        (_, output) => Some(output),
    };

    Ok(Evaluation {
        state,
        effects: evaluator.effects,
        matched,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// The rule ran.
    Applied,
    /// The rule did not apply (failed branch, halted sequence).
    Skipped,
    /// A guard failed; the enclosing sequence stops.
    Halted,
}

struct Evaluator<'a> {
    context: &'a RuleContext,
    capabilities: &'a dyn CapabilityCatalog,
    output: Value,
    effects: Vec<Instruction>,
}

impl<'a> Evaluator<'a> {
    fn run(&mut self, rule: &Rule) -> RuleResult<Flow> {
        match rule {
            Rule::Condition {
                when,
                then,
                otherwise,
            } => {
                let holds = self.test(when)?;
                match (then, otherwise) {
                    (None, None) if holds => Ok(Flow::Applied),
                    (None, None) => Ok(Flow::Halted),
                    (Some(body), _) if holds => self.block(body),
                    (_, Some(body)) if !holds => self.block(body),
                    _ => Ok(Flow::Skipped),
                }
            }
            Rule::Assign { to, value } => {
                let value = self.eval(value)?;
                write_path(&mut self.output, &target_segments(to), value, to)?;
                Ok(Flow::Applied)
            }
            Rule::MapPayload {
                from,
                to,
                only,
                rename,
                defaults,
                ..
            } => {
                let source = match from {
                    Some(path) => self.field(path)?.clone(),
                    None => self.context.payload.clone(),
                };
                let target = to.as_deref().unwrap_or("");
                let segments = target_segments(target);

                let fields = match source {
                    Value::Object(fields) => fields,
                    scalar => {
                        write_path(&mut self.output, &segments, scalar, target)?;
                        return Ok(Flow::Applied);
                    }
                };

                let mut mapped = Map::new();
                for (key, value) in fields {
                    if let Some(only) = only {
                        if !only.contains(&key) {
                            continue;
                        }
                    }
                    let name = rename.get(&key).cloned().unwrap_or(key);
                    mapped.insert(name, value);
                }
                for (key, value) in defaults {
                    mapped.entry(key.clone()).or_insert_with(|| value.clone());
                }

                ensure_object(&mut self.output, &segments, target)?;
                for (key, value) in mapped {
                    let mut path = segments.clone();
                    path.push(key.as_str());
                    write_path(&mut self.output, &path, value, target)?;
                }
                Ok(Flow::Applied)
            }
            Rule::Execute { capability, args } => {
                if !self.capabilities.has_capability(capability) {
                    return Err(RuleError::UnknownCapability(capability.clone()));
                }
                let mut resolved = Map::new();
                for (name, expr) in args {
                    resolved.insert(name.clone(), self.eval(expr)?);
                }
                self.effects.push(Instruction {
                    capability: capability.clone(),
                    args: resolved,
                });
                Ok(Flow::Applied)
            }
            Rule::Sequence { rules } => self.block(rules),
        }
    }

    fn block(&mut self, rules: &[Rule]) -> RuleResult<Flow> {
        for rule in rules {
            if self.run(rule)? == Flow::Halted {
                return Ok(Flow::Skipped);
            }
        }
        Ok(Flow::Applied)
    }

    fn test(&self, expr: &Expr) -> RuleResult<bool> {
        match self.eval(expr)? {
            Value::Bool(flag) => Ok(flag),
            other => Err(RuleError::NotBoolean(type_name(&other).to_string())),
        }
    }

    fn lookup(&self, path: &str) -> RuleResult<Option<&Value>> {
        let segments = split_path(path);
        let Some((root, rest)) = segments.split_first() else {
            return Err(RuleError::UnknownField(path.to_string()));
        };

        let base = match *root {
            "payload" => Some(&self.context.payload),
            "state" => self.context.state.as_ref(),
            "meta" => Some(&self.context.meta),
            "output" => Some(&self.output),
            _ => return Err(RuleError::UnknownField(path.to_string())),
        };

        Ok(base.and_then(|value| lookup(value, rest)))
    }

    fn field(&self, path: &str) -> RuleResult<&Value> {
        self.lookup(path)?
            .ok_or_else(|| RuleError::UnknownField(path.to_string()))
    }

    fn eval(&self, expr: &Expr) -> RuleResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(path) => self.field(path).cloned(),
            Expr::Exists(path) => Ok(Value::Bool(self.lookup(path)?.is_some())),
            Expr::Eq(a, b) => Ok(Value::Bool(loose_eq(&self.eval(a)?, &self.eval(b)?))),
            Expr::Ne(a, b) => Ok(Value::Bool(!loose_eq(&self.eval(a)?, &self.eval(b)?))),
            Expr::Gt(a, b) => self.ordering("gt", a, b, |o| o == Ordering::Greater),
            Expr::Gte(a, b) => self.ordering("gte", a, b, |o| o != Ordering::Less),
            Expr::Lt(a, b) => self.ordering("lt", a, b, |o| o == Ordering::Less),
            Expr::Lte(a, b) => self.ordering("lte", a, b, |o| o != Ordering::Greater),
            Expr::In(needle, haystack) => {
                let needle = self.eval(needle)?;
                let found = match self.eval(haystack)? {
                    Value::Array(items) => items.iter().any(|item| loose_eq(item, &needle)),
                    Value::String(text) => match &needle {
                        Value::String(part) => text.contains(part.as_str()),
                        other => return Err(mismatch("in", "string", other)),
                    },
                    Value::Object(map) => match &needle {
                        Value::String(key) => map.contains_key(key),
                        other => return Err(mismatch("in", "string", other)),
                    },
                    other => return Err(mismatch("in", "array, string or object", &other)),
                };
                Ok(Value::Bool(found))
            }
            Expr::And(items) => {
                for item in items {
                    if !self.test(item)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(items) => {
                for item in items {
                    if self.test(item)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.test(inner)?)),
            Expr::Concat(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<RuleResult<Vec<_>>>()?;
                if !values.is_empty() && values.iter().all(Value::is_array) {
                    let joined = values
                        .into_iter()
                        .flat_map(|value| match value {
                            Value::Array(items) => items,
                            _ => Vec::new(),
                        })
                        .collect();
                    return Ok(Value::Array(joined));
                }
                Ok(Value::String(values.iter().map(to_text).collect()))
            }
            Expr::Add(a, b) => self.arithmetic("add", a, b, i64::checked_add, |x, y| x + y),
            Expr::Sub(a, b) => self.arithmetic("sub", a, b, i64::checked_sub, |x, y| x - y),
            Expr::Coalesce(items) => {
                for item in items {
                    let value = match item {
                        Expr::Field(path) => self.lookup(path)?.cloned().unwrap_or(Value::Null),
                        other => self.eval(other)?,
                    };
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Expr::Object(members) => {
                let mut object = Map::new();
                for (key, member) in members {
                    object.insert(key.clone(), self.eval(member)?);
                }
                Ok(Value::Object(object))
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<RuleResult<Vec<_>>>()
                .map(Value::Array),
        }
    }

    fn ordering(
        &self,
        op: &str,
        left: &Expr,
        right: &Expr,
        accept: impl Fn(Ordering) -> bool,
    ) -> RuleResult<Value> {
        let ordering = compare(op, &self.eval(left)?, &self.eval(right)?)?;
        Ok(Value::Bool(accept(ordering)))
    }

    fn arithmetic(
        &self,
        op: &str,
        left: &Expr,
        right: &Expr,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> RuleResult<Value> {
        let left = self.eval(left)?;
        let right = self.eval(right)?;

        if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
            if let Some(result) = int_op(a, b) {
                return Ok(Value::from(result));
            }
        }

        match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => {
                let result = float_op(a, b);
                if !result.is_finite() {
                    return Err(RuleError::TypeMismatch {
                        op: op.to_string(),
                        detail: format!("result for {a} and {b} is not a finite number"),
                    });
                }
                Ok(Value::from(result))
            }
            _ => Err(RuleError::TypeMismatch {
                op: op.to_string(),
                detail: format!("expected numbers, got {} and {}", type_name(&left), type_name(&right)),
            }),
        }
    }
}

fn mismatch(op: &str, expected: &str, found: &Value) -> RuleError {
    RuleError::TypeMismatch {
        op: op.to_string(),
        detail: format!("expected {}, got {}", expected, type_name(found)),
    }
}
