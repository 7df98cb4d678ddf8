//! `$ref` inlining against a definition registry
//!
//! Resolution works on a deep copy, so the caller's schema is never altered.
//! Definitions referencing each other are expanded depth-first; an expansion
//! stack detects cycles. Registry keys take precedence; references starting
//! with `#` that are not registry keys are JSON pointers into the document
//! they appear in: the inlined definition, or the root schema outside any.

use serde_json::Value;
use std::collections::BTreeSet;

use super::DefinitionRegistry;
use crate::runtime::error::{SchemaError, SchemaResult};

/// Inline every `$ref` of `schema`, returning a self-contained copy.
pub fn resolve(name: &str, schema: &Value, definitions: &DefinitionRegistry) -> SchemaResult<Value> {
    let mut resolver = Resolver {
        name,
        definitions,
        root: Document { key: None, root: schema },
        scopes: Vec::new(),
        stack: Vec::new(),
    };

    let mut resolved = schema.clone();
    resolver.inline(&mut resolved)?;
    Ok(resolved)
}

/// All distinct `$ref` targets in a fragment, sorted.
pub fn collect_refs(schema: &Value) -> Vec<String> {
    let mut refs = BTreeSet::new();
    walk_refs(schema, &mut refs);
    refs.into_iter().collect()
}

/// Whether any `$ref` node remains in the fragment.
pub fn contains_ref(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => map.contains_key("$ref") || map.values().any(contains_ref),
        Value::Array(items) => items.iter().any(contains_ref),
        _ => false,
    }
}

/// Check that every reference of `schema` can be satisfied without resolving it.
pub fn ensure_refs_known(
    name: &str,
    schema: &Value,
    definitions: &DefinitionRegistry,
) -> SchemaResult<()> {
    for reference in collect_refs(schema) {
        if definitions.contains_key(&reference) {
            continue;
        }
        match reference.strip_prefix('#') {
            Some(pointer) if schema.pointer(pointer).is_some() => continue,
            Some(_) => {
                return Err(SchemaError::InvalidPointer {
                    schema: name.to_string(),
                    pointer: reference,
                });
            }
            None => {
                return Err(SchemaError::MissingReference {
                    reference,
                    schema: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn walk_refs(schema: &Value, refs: &mut BTreeSet<String>) {
    match schema {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                refs.insert(reference.clone());
            }
            for value in map.values() {
                walk_refs(value, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_refs(item, refs);
            }
        }
        _ => {}
    }
}

/// A schema document whose `#` pointers are in scope.
#[derive(Clone, Copy)]
struct Document<'a> {
    /// Registry key, or `None` for the schema being resolved
    key: Option<&'a str>,
    root: &'a Value,
}

/// What a reference points at, and the document it opens if any.
struct Target<'a> {
    key: String,
    schema: &'a Value,
    opens: Option<Document<'a>>,
}

struct Resolver<'a> {
    name: &'a str,
    definitions: &'a DefinitionRegistry,
    root: Document<'a>,
    /// Definitions being inlined, innermost last
    scopes: Vec<Document<'a>>,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn inline(&mut self, node: &mut Value) -> SchemaResult<()> {
        if let Some(reference) = ref_target(node) {
            *node = self.expand(&reference)?;
            return Ok(());
        }

        match node {
            Value::Object(map) => {
                for value in map.values_mut() {
                    self.inline(value)?;
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.inline(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn expand(&mut self, reference: &str) -> SchemaResult<Value> {
        let target = self.lookup(reference)?;
        if self.stack.contains(&target.key) {
            let mut cycle = self.stack.clone();
            cycle.push(target.key);
            return Err(SchemaError::CyclicReference {
                schema: self.name.to_string(),
                cycle,
            });
        }

        let mut expanded = target.schema.clone();
        // The inlined copy is anonymous; identity stays with the definition.
        if let Value::Object(map) = &mut expanded {
            map.remove("$id");
        }

        self.stack.push(target.key);
        if let Some(document) = target.opens {
            self.scopes.push(document);
        }
        let outcome = self.inline(&mut expanded);
        if target.opens.is_some() {
            self.scopes.pop();
        }
        self.stack.pop();

        outcome.map(|_| expanded)
    }

    fn lookup(&self, reference: &str) -> SchemaResult<Target<'a>> {
        if let Some((key, definition)) = self.definitions.get_key_value(reference) {
            return Ok(Target {
                key: key.clone(),
                schema: definition,
                opens: Some(Document {
                    key: Some(key.as_str()),
                    root: definition,
                }),
            });
        }

        if let Some(pointer) = reference.strip_prefix('#') {
            let document = self.document();
            let schema = document
                .root
                .pointer(pointer)
                .ok_or_else(|| SchemaError::InvalidPointer {
                    schema: self.referrer(),
                    pointer: reference.to_string(),
                })?;
            // Pointers are only unique within their document.
            let key = match document.key {
                Some(owner) => format!("{owner}{reference}"),
                None => reference.to_string(),
            };
            return Ok(Target {
                key,
                schema,
                opens: None,
            });
        }

        Err(SchemaError::MissingReference {
            reference: reference.to_string(),
            schema: self.referrer(),
        })
    }

    /// Innermost document; `#` pointers resolve against its root.
    fn document(&self) -> Document<'a> {
        self.scopes.last().copied().unwrap_or(self.root)
    }

    /// Name of the schema currently holding the reference being expanded.
    fn referrer(&self) -> String {
        self.stack
            .last()
            .map(String::as_str)
            .unwrap_or(self.name)
            .to_string()
    }
}

fn ref_target(node: &Value) -> Option<String> {
    node.get("$ref")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs(entries: &[(&str, Value)]) -> DefinitionRegistry {
        entries
            .iter()
            .map(|(id, schema)| (id.to_string(), schema.clone()))
            .collect()
    }

    #[test]
    fn test_inlines_nested_definitions() {
        let definitions = defs(&[
            (
                "/definitions/app/Address",
                json!({"$id": "/definitions/app/Address", "type": "object", "properties": {"city": {"$ref": "/definitions/app/City"}}}),
            ),
            ("/definitions/app/City", json!({"type": "string", "minLength": 1})),
        ]);
        let schema = json!({
            "type": "object",
            "properties": {
                "home": {"$ref": "/definitions/app/Address"},
                "tags": {"type": "array", "items": {"$ref": "/definitions/app/City"}}
            }
        });

        let resolved = resolve("Person", &schema, &definitions).unwrap();

        assert!(!contains_ref(&resolved));
        assert_eq!(
            resolved["properties"]["home"]["properties"]["city"],
            json!({"type": "string", "minLength": 1})
        );
        assert!(resolved["properties"]["home"].get("$id").is_none());
        assert_eq!(resolved["properties"]["tags"]["items"]["type"], "string");
    }

    #[test]
    fn test_input_schema_untouched() {
        let definitions = defs(&[("/definitions/Id", json!({"type": "string"}))]);
        let schema = json!({"type": "object", "properties": {"id": {"$ref": "/definitions/Id"}}});
        let before = schema.clone();

        let _ = resolve("Thing", &schema, &definitions).unwrap();

        assert_eq!(schema, before);
    }

    #[test]
    fn test_missing_reference_names_schema() {
        let schema = json!({"type": "object", "properties": {"x": {"$ref": "/definitions/Nope"}}});
        let err = resolve("AddTodo", &schema, &DefinitionRegistry::new()).unwrap_err();

        assert_eq!(
            err,
            SchemaError::MissingReference {
                reference: "/definitions/Nope".to_string(),
                schema: "AddTodo".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_reference_inside_definition_names_definition() {
        let definitions = defs(&[("/definitions/A", json!({"$ref": "/definitions/B"}))]);
        let schema = json!({"$ref": "/definitions/A"});

        match resolve("Root", &schema, &definitions) {
            Err(SchemaError::MissingReference { reference, schema }) => {
                assert_eq!(reference, "/definitions/B");
                assert_eq!(schema, "/definitions/A");
            }
            other => panic!("expected missing reference, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let definitions = defs(&[
            ("/definitions/A", json!({"type": "object", "properties": {"b": {"$ref": "/definitions/B"}}})),
            ("/definitions/B", json!({"type": "object", "properties": {"a": {"$ref": "/definitions/A"}}})),
        ]);
        let schema = json!({"$ref": "/definitions/A"});

        match resolve("Loop", &schema, &definitions) {
            Err(SchemaError::CyclicReference { schema, cycle }) => {
                assert_eq!(schema, "Loop");
                assert_eq!(cycle, vec!["/definitions/A", "/definitions/B", "/definitions/A"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_shared_definition_is_not_a_cycle() {
        let definitions = defs(&[("/definitions/Id", json!({"type": "string"}))]);
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"$ref": "/definitions/Id"},
                "b": {"$ref": "/definitions/Id"}
            }
        });

        let resolved = resolve("Pair", &schema, &definitions).unwrap();
        assert_eq!(resolved["properties"]["a"], resolved["properties"]["b"]);
    }

    #[test]
    fn test_local_pointer_resolution() {
        let schema = json!({
            "type": "object",
            "definitions": {"money": {"type": "number", "minimum": 0}},
            "properties": {"price": {"$ref": "#/definitions/money"}}
        });

        let resolved = resolve("Product", &schema, &DefinitionRegistry::new()).unwrap();
        assert_eq!(resolved["properties"]["price"]["minimum"], 0);

        let bad = json!({"properties": {"x": {"$ref": "#/definitions/none"}}});
        assert!(matches!(
            resolve("Bad", &bad, &DefinitionRegistry::new()),
            Err(SchemaError::InvalidPointer { .. })
        ));
    }

    #[test]
    fn test_collect_and_ensure_refs() {
        let definitions = defs(&[("/definitions/Id", json!({"type": "string"}))]);
        let schema = json!({
            "properties": {
                "a": {"$ref": "/definitions/Id"},
                "b": {"items": {"$ref": "/definitions/Other"}}
            }
        });

        assert_eq!(collect_refs(&schema), vec!["/definitions/Id", "/definitions/Other"]);
        assert!(matches!(
            ensure_refs_known("Doc", &schema, &definitions),
            Err(SchemaError::MissingReference { reference, .. }) if reference == "/definitions/Other"
        ));
    }

    #[test]
    fn test_local_pointer_inside_definition_uses_definition_root() {
        let money = json!({
            "definitions": {"amount": {"type": "number"}},
            "properties": {"value": {"$ref": "#/definitions/amount"}}
        });
        let definitions = defs(&[("/definitions/app/Money", money)]);
        let schema = json!({"type": "object", "properties": {"price": {"$ref": "/definitions/app/Money"}}});

        let resolved = resolve("Product", &schema, &definitions).unwrap();
        assert_eq!(
            resolved["properties"]["price"]["properties"]["value"],
            json!({"type": "number"})
        );

        // A root declaring the same local name does not leak into the definition.
        let shadowing = json!({
            "definitions": {"amount": {"type": "string"}},
            "properties": {
                "price": {"$ref": "/definitions/app/Money"},
                "label": {"$ref": "#/definitions/amount"}
            }
        });
        let resolved = resolve("Product", &shadowing, &definitions).unwrap();
        assert_eq!(
            resolved["properties"]["price"]["properties"]["value"],
            json!({"type": "number"})
        );
        assert_eq!(resolved["properties"]["label"], json!({"type": "string"}));
    }

    #[test]
    fn test_same_pointer_in_two_documents_is_not_a_cycle() {
        let money = json!({
            "definitions": {"amount": {"type": "number"}},
            "properties": {"value": {"$ref": "#/definitions/amount"}}
        });
        let definitions = defs(&[("/definitions/app/Money", money)]);
        let schema = json!({
            "definitions": {"amount": {"properties": {"money": {"$ref": "/definitions/app/Money"}}}},
            "properties": {"total": {"$ref": "#/definitions/amount"}}
        });

        let resolved = resolve("Invoice", &schema, &definitions).unwrap();
        assert_eq!(
            resolved["properties"]["total"]["properties"]["money"]["properties"]["value"],
            json!({"type": "number"})
        );
    }
}
