//! `$ref` resolution.
//!
//! The resolver walks every subschema depth-first, inlining references that
//! do not loop and leaving a `{"$ref": ...}` placeholder wherever a reference
//! points back to a node that is still being walked. Resolved reference
//! targets are memoized in the [`SchemaRefLibrary`] using a
//! placeholder-then-replace protocol: the entry is inserted as `None` before
//! the target is walked, so a second encounter during that walk sees the
//! in-progress marker instead of recursing again.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    error::FormError,
    pointer::{self, APPEND, ArrayMap, RecursiveRefMap},
    schema::{SchemaType, primary_type, ref_target},
};

/// Schema pointer → resolved subschema (`None` while being built).
pub type SchemaRefLibrary = IndexMap<String, Option<Value>>;

/// Output of [`resolve`].
#[derive(Debug, Default)]
pub struct ResolvedSchema {
    /// The schema with non-recursive references inlined.
    pub schema: Value,
    /// Resolved targets of every reference encountered.
    pub ref_library: SchemaRefLibrary,
    /// Generic data pointer of a recursive `$ref` → data pointer it repeats.
    pub recursive_refs: RecursiveRefMap,
    /// Schema pointer of each recursive placeholder → its target pointer.
    pub schema_recursive_refs: IndexMap<String, String>,
    /// Generic array pointer → tuple length.
    pub array_map: ArrayMap,
    /// Whether the schema references its own root.
    pub has_root_reference: bool,
    /// Structural problems found while resolving.
    pub diagnostics: Vec<FormError>,
}

impl ResolvedSchema {
    /// Look up a resolved subschema by schema pointer.
    ///
    /// Pointers into `definitions` are answered from the reference library,
    /// everything else from the resolved document.
    pub fn subschema(&self, schema_pointer: &str) -> Option<&Value> {
        if let Some(Some(hit)) = self.ref_library.get(schema_pointer) {
            return Some(hit);
        }
        pointer::get(&self.schema, schema_pointer).or_else(|| {
            // Pointers through a library entry (`/definitions/node/properties/x`).
            self.ref_library
                .iter()
                .filter(|(base, _)| !base.is_empty() && pointer::is_sub_pointer(base, schema_pointer))
                .max_by_key(|(base, _)| base.len())
                .and_then(|(base, entry)| {
                    pointer::get(entry.as_ref()?, &schema_pointer[base.len()..])
                })
        })
    }

    /// Whether a recursive placeholder sits at `schema_pointer`.
    pub fn is_recursive_ref(&self, schema_pointer: &str) -> bool {
        self.schema_recursive_refs.contains_key(schema_pointer)
    }
}

/// Resolve every `$ref` in `root`.
pub fn resolve(root: &Value) -> ResolvedSchema {
    let mut resolver = Resolver {
        root,
        out: ResolvedSchema::default(),
        path: Vec::new(),
    };
    let schema = resolver.walk(root, "", "");
    let mut out = resolver.out;
    out.schema = schema;

    // Targets cut by recursion but never reached through a `$ref` (the root,
    // or an ancestor addressed by its own pointer) are filled in from the
    // finished document.
    let targets: Vec<String> = out.schema_recursive_refs.values().cloned().collect();
    for target in targets {
        if matches!(out.ref_library.get(&target), Some(Some(_))) {
            continue;
        }
        match pointer::get(&out.schema, &target).cloned() {
            Some(resolved) => {
                out.ref_library.insert(target, Some(resolved));
            }
            None => {
                out.ref_library.shift_remove(&target);
            }
        }
    }
    debug!(
        "resolved schema: {} library entries, {} recursive refs, {} arrays",
        out.ref_library.len(),
        out.recursive_refs.len(),
        out.array_map.len()
    );
    out
}

struct Resolver<'a> {
    root: &'a Value,
    out: ResolvedSchema,
    /// (schema pointer, generic data pointer) of every node being walked.
    path: Vec<(String, String)>,
}

impl Resolver<'_> {
    fn walk(&mut self, node: &Value, schema_ptr: &str, data_ptr: &str) -> Value {
        let Value::Object(map) = node else {
            return node.clone();
        };
        if let Some(Value::String(reference)) = map.get("$ref") {
            return self.resolve_ref(map, reference, schema_ptr, data_ptr);
        }

        self.path.push((schema_ptr.to_string(), data_ptr.to_string()));
        let mut out = Map::new();
        for (key, value) in map {
            let here = pointer::join(schema_ptr, key);
            let resolved = match (key.as_str(), value) {
                ("properties" | "patternProperties", Value::Object(props)) => {
                    let mut walked = Map::new();
                    for (name, sub) in props {
                        let data = if key == "properties" {
                            pointer::join(data_ptr, name)
                        } else {
                            pointer::join(data_ptr, APPEND)
                        };
                        walked.insert(name.clone(), self.walk(sub, &pointer::join(&here, name), &data));
                    }
                    Value::Object(walked)
                }
                ("items", Value::Array(tuple)) => {
                    self.out.array_map.insert(data_ptr.to_string(), tuple.len());
                    let walked = tuple
                        .iter()
                        .enumerate()
                        .map(|(i, sub)| {
                            self.walk(sub, &pointer::join_index(&here, i), &pointer::join_index(data_ptr, i))
                        })
                        .collect();
                    Value::Array(walked)
                }
                ("items" | "additionalItems" | "additionalProperties", Value::Object(_)) => {
                    if key == "items" {
                        self.out.array_map.entry(data_ptr.to_string()).or_insert(0);
                    }
                    self.walk(value, &here, &pointer::join(data_ptr, APPEND))
                }
                ("allOf" | "anyOf" | "oneOf", Value::Array(list)) => Value::Array(
                    list.iter()
                        .enumerate()
                        .map(|(i, sub)| self.walk(sub, &pointer::join_index(&here, i), data_ptr))
                        .collect(),
                ),
                ("if" | "then" | "else" | "not", Value::Object(_)) => self.walk(value, &here, data_ptr),
                ("dependencies" | "dependentSchemas", Value::Object(deps)) => {
                    let mut walked = Map::new();
                    for (name, sub) in deps {
                        let sub = if sub.is_object() {
                            self.walk(sub, &pointer::join(&here, name), data_ptr)
                        } else {
                            sub.clone()
                        };
                        walked.insert(name.clone(), sub);
                    }
                    Value::Object(walked)
                }
                _ => value.clone(),
            };
            out.insert(key.clone(), resolved);
        }
        self.path.pop();

        let out = Value::Object(out);
        if primary_type(&out) == Some(SchemaType::Array) {
            self.out.array_map.entry(data_ptr.to_string()).or_insert(0);
        }
        out
    }

    fn resolve_ref(
        &mut self,
        map: &Map<String, Value>,
        reference: &str,
        schema_ptr: &str,
        data_ptr: &str,
    ) -> Value {
        let mut siblings = map.clone();
        siblings.shift_remove("$ref");
        let siblings = if siblings.is_empty() {
            Map::new()
        } else {
            match self.walk(&Value::Object(siblings), schema_ptr, data_ptr) {
                Value::Object(walked) => walked,
                _ => Map::new(),
            }
        };

        let Some(target) = ref_target(reference) else {
            return self.unresolved(schema_ptr, reference, siblings);
        };

        if let Some((_, ancestor_data)) = self.path.iter().rev().find(|(p, _)| *p == target) {
            if ancestor_data.as_str() != data_ptr {
                self.out
                    .recursive_refs
                    .insert(data_ptr.to_string(), ancestor_data.clone());
            }
            self.out
                .schema_recursive_refs
                .insert(schema_ptr.to_string(), target.clone());
            if target.is_empty() {
                self.out.has_root_reference = true;
            }
            debug!("recursive $ref {reference} at {schema_ptr} (data {data_ptr})");
            let mut placeholder = siblings;
            placeholder.insert("$ref".into(), Value::String(format!("#{target}")));
            return Value::Object(placeholder);
        }

        if let Some(None) = self.out.ref_library.get(&target) {
            // In progress but not an ancestor: the references loop without
            // any schema structure in between.
            return self.unresolved(schema_ptr, reference, siblings);
        }

        let inserted = !self.out.ref_library.contains_key(&target);
        if inserted {
            self.out.ref_library.insert(target.clone(), None);
        }
        let Some(target_node) = pointer::get(self.root, &target) else {
            if inserted {
                self.out.ref_library.shift_remove(&target);
            }
            return self.unresolved(schema_ptr, reference, siblings);
        };

        let resolved = self.walk(target_node, &target, data_ptr);
        if let Some(entry) = self.out.ref_library.get_mut(&target)
            && entry.is_none()
        {
            *entry = Some(resolved.clone());
        }

        match resolved {
            Value::Object(mut merged) => {
                for (key, value) in siblings {
                    merged.insert(key, value);
                }
                Value::Object(merged)
            }
            other if siblings.is_empty() => other,
            _ => Value::Object(siblings),
        }
    }

    fn unresolved(&mut self, schema_ptr: &str, reference: &str, siblings: Map<String, Value>) -> Value {
        let err = FormError::UnresolvedReference {
            pointer: schema_ptr.to_string(),
            reference: reference.to_string(),
        };
        error!("{err}");
        self.out.diagnostics.push(err);
        Value::Object(siblings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_recursion_terminates() {
        let schema = json!({"type": "object", "properties": {"child": {"$ref": "#"}}});
        let out = resolve(&schema);
        assert!(out.has_root_reference);
        assert_eq!(out.recursive_refs.get("/child").map(String::as_str), Some(""));
        assert_eq!(out.schema["properties"]["child"], json!({"$ref": "#"}));
        assert!(matches!(out.ref_library.get(""), Some(Some(_))));
        assert!(out.is_recursive_ref("/properties/child"));
    }

    #[test]
    fn test_definitions_are_inlined() {
        let schema = json!({
            "definitions": {"name": {"type": "string", "minLength": 2}},
            "type": "object",
            "properties": {
                "first": {"$ref": "#/definitions/name", "title": "First"},
                "last": {"$ref": "#/definitions/name"}
            }
        });
        let out = resolve(&schema);
        assert_eq!(
            out.schema["properties"]["first"],
            json!({"type": "string", "minLength": 2, "title": "First"})
        );
        assert_eq!(out.schema["properties"]["last"]["minLength"], json!(2));
        assert!(out.ref_library.contains_key("/definitions/name"));
        assert!(!out.has_root_reference);
        assert!(out.recursive_refs.is_empty());
    }

    #[test]
    fn test_indirect_cycle() {
        let schema = json!({
            "definitions": {
                "a": {"type": "object", "properties": {"b": {"$ref": "#/definitions/b"}}},
                "b": {"type": "object", "properties": {"a": {"$ref": "#/definitions/a"}}}
            },
            "type": "object",
            "properties": {"start": {"$ref": "#/definitions/a"}}
        });
        let out = resolve(&schema);
        assert_eq!(out.recursive_refs.get("/start/b/a").map(String::as_str), Some("/start"));
        assert_eq!(
            out.schema["properties"]["start"]["properties"]["b"]["properties"]["a"],
            json!({"$ref": "#/definitions/a"})
        );
        assert!(matches!(out.ref_library.get("/definitions/a"), Some(Some(_))));
        assert!(matches!(out.ref_library.get("/definitions/b"), Some(Some(_))));
    }

    #[test]
    fn test_array_map() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "point": {"type": "array", "items": [{"type": "number"}, {"type": "number"}]}
            }
        });
        let out = resolve(&schema);
        assert_eq!(out.array_map.get("/tags"), Some(&0));
        assert_eq!(out.array_map.get("/point"), Some(&2));
    }

    #[test]
    fn test_unresolved_ref_is_reported() {
        let schema = json!({"properties": {"x": {"$ref": "#/definitions/missing", "title": "X"}}});
        let out = resolve(&schema);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.schema["properties"]["x"], json!({"title": "X"}));
        assert!(!out.ref_library.contains_key("/definitions/missing"));
    }

    #[test]
    fn test_pure_ref_loop_is_reported() {
        let schema = json!({
            "definitions": {"a": {"$ref": "#/definitions/b"}, "b": {"$ref": "#/definitions/a"}},
            "properties": {"x": {"$ref": "#/definitions/a"}}
        });
        let out = resolve(&schema);
        assert!(!out.diagnostics.is_empty());
    }
}
