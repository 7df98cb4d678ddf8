use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{RuleError, RuleResult};

/// Split a dotted path into segments, ignoring empty ones.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|segment| !segment.is_empty()).collect()
}

/// Strip an optional `state.` / `output.` prefix from an assignment target.
pub fn target_segments(path: &str) -> Vec<&str> {
    let mut segments = split_path(path);
    if matches!(segments.first(), Some(&"state") | Some(&"output")) {
        segments.remove(0);
    }
    segments
}

/// Follow `segments` below `root`. Numeric segments index into arrays.
pub fn lookup<'v>(root: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Write `value` at `segments` below `root`, creating intermediate objects.
///
/// Writing to an empty path replaces `root`. A `null` node on the way is
/// promoted to an object; any other scalar blocks the write.
pub fn write_path(root: &mut Value, segments: &[&str], value: Value, path: &str) -> RuleResult<()> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = child_mut(node, segment, path)?;
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => match last.parse::<usize>().ok().and_then(|idx| items.get_mut(idx)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuleError::InvalidPath(path.to_string())),
        },
        _ => Err(RuleError::InvalidPath(path.to_string())),
    }
}

/// Make sure a container lives at `segments`, creating it when missing or `null`.
pub fn ensure_object(root: &mut Value, segments: &[&str], path: &str) -> RuleResult<()> {
    let mut node = root;
    for segment in segments {
        node = child_mut(node, segment, path)?;
    }
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    Ok(())
}

fn child_mut<'v>(node: &'v mut Value, segment: &str, path: &str) -> RuleResult<&'v mut Value> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get_mut(idx))
            .ok_or_else(|| RuleError::InvalidPath(path.to_string())),
        _ => Err(RuleError::InvalidPath(path.to_string())),
    }
}

/// Equality where numbers compare by numeric value (`1 == 1.0`).
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Ordering for numbers and strings; other combinations are a type mismatch.
pub fn compare(op: &str, left: &Value, right: &Value) -> RuleResult<Ordering> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    ordering.ok_or_else(|| RuleError::TypeMismatch {
        op: op.to_string(),
        detail: format!("cannot compare {} with {}", type_name(left), type_name(right)),
    })
}

/// Text form used by `concat`.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// JSON type name for diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_objects_and_arrays() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(lookup(&doc, &split_path("items.1.name")), Some(&json!("b")));
        assert_eq!(lookup(&doc, &split_path("items.9.name")), None);
        assert_eq!(lookup(&doc, &split_path("")), Some(&doc));
    }

    #[test]
    fn test_write_path_creates_objects() {
        let mut root = Value::Null;
        write_path(&mut root, &["address", "city"], json!("Bonn"), "address.city").unwrap();
        assert_eq!(root, json!({"address": {"city": "Bonn"}}));

        let mut scalar = json!({"title": "x"});
        let err = write_path(&mut scalar, &["title", "len"], json!(1), "title.len").unwrap_err();
        assert_eq!(err, RuleError::InvalidPath("title.len".to_string()));
    }

    #[test]
    fn test_target_prefix_stripped() {
        assert_eq!(target_segments("state.status"), vec!["status"]);
        assert_eq!(target_segments("status"), vec!["status"]);
        assert!(target_segments("state").is_empty());
    }

    #[test]
    fn test_numeric_equality_and_ordering() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(!loose_eq(&json!("1"), &json!(1)));
        assert_eq!(compare("gt", &json!(2), &json!(1.5)).unwrap(), Ordering::Greater);
        assert!(compare("gt", &json!(true), &json!(1)).is_err());
    }
}
