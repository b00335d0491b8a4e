//! JSON Schema helpers.
//!
//! This module provides the read-only queries the builders ask of a schema
//! node: its type, its title, the branches of its combinators, and the
//! translation between data pointers and schema pointers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pointer::{self, APPEND};

/// `$ref` resolution and the schema reference library.
pub mod resolver;

pub use resolver::{ResolvedSchema, SchemaRefLibrary, resolve};

/// The primitive JSON Schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// `"string"`
    String,
    /// `"integer"`
    Integer,
    /// `"number"`
    Number,
    /// `"boolean"`
    Boolean,
    /// `"null"`
    Null,
    /// `"object"`
    Object,
    /// `"array"`
    Array,
}

impl SchemaType {
    /// Parse a `type` keyword value.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "string" => SchemaType::String,
            "integer" => SchemaType::Integer,
            "number" => SchemaType::Number,
            "boolean" => SchemaType::Boolean,
            "null" => SchemaType::Null,
            "object" => SchemaType::Object,
            "array" => SchemaType::Array,
            _ => return None,
        })
    }

    /// The keyword spelling of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }

    /// Whether values of this type are leaves of the data tree.
    pub fn is_scalar(self) -> bool {
        !matches!(self, SchemaType::Object | SchemaType::Array)
    }

    /// The type of a concrete JSON value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => SchemaType::Null,
            Value::Bool(_) => SchemaType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => SchemaType::Integer,
            Value::Number(_) => SchemaType::Number,
            Value::String(_) => SchemaType::String,
            Value::Array(_) => SchemaType::Array,
            Value::Object(_) => SchemaType::Object,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared types of a schema node, in keyword order.
///
/// Falls back to inference when `type` is absent: `properties` implies an
/// object, `items` an array, `const`/`enum` the type of their values, and
/// combinators the type shared by all of their branches.
pub fn schema_types(schema: &Value) -> Vec<SchemaType> {
    match schema.get("type") {
        Some(Value::String(s)) => SchemaType::parse(s).into_iter().collect(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .filter_map(SchemaType::parse)
            .collect(),
        _ => infer_type(schema).into_iter().collect(),
    }
}

/// The first non-null declared type (or `Null` if that is all there is).
pub fn primary_type(schema: &Value) -> Option<SchemaType> {
    let types = schema_types(schema);
    types
        .iter()
        .copied()
        .find(|t| *t != SchemaType::Null)
        .or_else(|| types.first().copied())
}

/// Whether `null` is among the declared types.
pub fn is_nullable(schema: &Value) -> bool {
    schema_types(schema).contains(&SchemaType::Null) || schema.get("nullable") == Some(&Value::Bool(true))
}

fn infer_type(schema: &Value) -> Option<SchemaType> {
    let map = schema.as_object()?;
    if map.contains_key("properties") || map.contains_key("additionalProperties") {
        return Some(SchemaType::Object);
    }
    if map.contains_key("items") {
        return Some(SchemaType::Array);
    }
    if let Some(value) = map.get("const") {
        return Some(SchemaType::of_value(value));
    }
    if let Some(first) = map.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return Some(SchemaType::of_value(first));
    }
    for keyword in ["allOf", "anyOf", "oneOf"] {
        let Some(branches) = map.get(keyword).and_then(Value::as_array) else {
            continue;
        };
        let mut types = branches.iter().map(primary_type);
        if let Some(Some(first)) = types.next()
            && types.all(|t| t == Some(first))
        {
            return Some(first);
        }
    }
    if ["then", "else"].iter().any(|k| map.contains_key(*k)) {
        return Some(SchemaType::Object);
    }
    None
}

/// Resolve a local `$ref` string into a schema pointer.
///
/// Only same-document references are supported: `#`, `#/a/b`.
pub fn ref_target(reference: &str) -> Option<String> {
    let fragment = reference.strip_prefix('#')?;
    pointer::parse(fragment).ok().map(|keys| pointer::compile(&keys))
}

/// The `$ref` target of a placeholder node, if it is one.
pub fn placeholder_target(schema: &Value) -> Option<String> {
    schema.get("$ref").and_then(Value::as_str).and_then(ref_target)
}

/// Turn a property name into a display title (`zipCode` → `Zip Code`).
pub fn humanize(key: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;
    for c in key.chars() {
        let boundary = match prev {
            Some(p) => {
                (c.is_uppercase() && p.is_lowercase())
                    || (c.is_ascii_digit() && !p.is_ascii_digit())
                    || (!c.is_ascii_digit() && p.is_ascii_digit())
            }
            None => false,
        };
        if c == '_' || c == '-' || c == ' ' || c == '.' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `key` is listed in the `required` keyword of `parent`.
pub fn is_required(parent: &Value, key: &str) -> bool {
    parent
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|req| req.iter().any(|r| r.as_str() == Some(key)))
}

/// One option of an enumerated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleMapItem {
    /// Label shown to the user.
    pub name: String,
    /// Value stored in the data.
    pub value: Value,
}

/// Build the option list of an enumerated schema.
///
/// Uses `enum` (labelled by `x-enumNames`/`enumNames` when present), a
/// `oneOf`/`anyOf` whose branches are all `const`, or the same on `items`.
pub fn title_map(schema: &Value) -> Vec<TitleMapItem> {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let names = schema
            .get("x-enumNames")
            .or_else(|| schema.get("enumNames"))
            .and_then(Value::as_array);
        return values
            .iter()
            .enumerate()
            .map(|(i, value)| TitleMapItem {
                name: names
                    .and_then(|n| n.get(i))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| label_of(value)),
                value: value.clone(),
            })
            .collect();
    }
    for keyword in ["oneOf", "anyOf"] {
        if let Some(branches) = schema.get(keyword).and_then(Value::as_array)
            && !branches.is_empty()
            && branches.iter().all(|b| b.get("const").is_some())
        {
            return branches
                .iter()
                .map(|b| TitleMapItem {
                    name: b
                        .get("title")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| label_of(&b["const"])),
                    value: b["const"].clone(),
                })
                .collect();
        }
    }
    match schema.get("items") {
        Some(items) if items.is_object() => title_map(items),
        _ => Vec::new(),
    }
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(s) => humanize(s),
        other => other.to_string(),
    }
}

/// Composition keywords handled by the builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombinatorKind {
    /// Every branch applies.
    AllOf,
    /// At least one branch applies.
    AnyOf,
    /// Exactly one branch applies.
    OneOf,
    /// `then` applies when `if` matches, `else` otherwise.
    IfThenElse,
}

impl CombinatorKind {
    /// Schema keyword introducing the combinator.
    pub fn keyword(self) -> &'static str {
        match self {
            CombinatorKind::AllOf => "allOf",
            CombinatorKind::AnyOf => "anyOf",
            CombinatorKind::OneOf => "oneOf",
            CombinatorKind::IfThenElse => "if",
        }
    }
}

/// One branch of a combinator.
#[derive(Debug, Clone)]
pub struct Branch<'a> {
    /// Branch position (`then` is 0 and `else` is 1 for conditionals).
    pub index: usize,
    /// Absolute schema pointer of the branch.
    pub pointer: String,
    /// The branch schema.
    pub schema: &'a Value,
    /// `true` for the `else` branch of a conditional.
    pub negated: bool,
}

/// Combinators present on a schema node, in a fixed order.
pub fn combinators(schema: &Value) -> Vec<CombinatorKind> {
    let Some(map) = schema.as_object() else {
        return Vec::new();
    };
    let mut kinds: Vec<CombinatorKind> = [
        CombinatorKind::AllOf,
        CombinatorKind::AnyOf,
        CombinatorKind::OneOf,
    ]
    .into_iter()
    .filter(|k| map.get(k.keyword()).is_some_and(Value::is_array))
    .collect();
    if map.contains_key("if") && (map.contains_key("then") || map.contains_key("else")) {
        kinds.push(CombinatorKind::IfThenElse);
    }
    kinds
}

/// Branches of one combinator of `schema`, which lives at `schema_pointer`.
pub fn branches<'a>(schema: &'a Value, kind: CombinatorKind, schema_pointer: &str) -> Vec<Branch<'a>> {
    match kind {
        CombinatorKind::IfThenElse => ["then", "else"]
            .iter()
            .enumerate()
            .filter_map(|(index, key)| {
                schema.get(*key).map(|branch| Branch {
                    index,
                    pointer: pointer::join(schema_pointer, key),
                    schema: branch,
                    negated: index == 1,
                })
            })
            .collect(),
        _ => schema
            .get(kind.keyword())
            .and_then(Value::as_array)
            .map(|list| {
                let base = pointer::join(schema_pointer, kind.keyword());
                list.iter()
                    .enumerate()
                    .map(|(index, branch)| Branch {
                        index,
                        pointer: pointer::join_index(&base, index),
                        schema: branch,
                        negated: false,
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Tuple slots and list item schema of an array node at `schema_pointer`.
///
/// The list item comes with its schema pointer: `items` for plain lists,
/// `additionalItems` behind a tuple.
pub fn array_items<'a>(schema: &'a Value, schema_pointer: &str) -> (&'a [Value], Option<(&'a Value, String)>) {
    match schema.get("items") {
        Some(Value::Array(tuple)) => (
            tuple.as_slice(),
            schema
                .get("additionalItems")
                .filter(|v| v.is_object())
                .map(|v| (v, pointer::join(schema_pointer, "additionalItems"))),
        ),
        Some(item @ Value::Object(_)) => (&[][..], Some((item, pointer::join(schema_pointer, "items")))),
        _ => (&[][..], None),
    }
}

/// Property names declared directly or through combinator branches.
pub fn property_names(schema: &Value) -> Vec<String> {
    let mut names: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    for kind in combinators(schema) {
        for branch in branches(schema, kind, "") {
            for name in property_names(branch.schema) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Follow `$ref` placeholders until a concrete node is reached.
fn follow_refs<'a>(
    mut base: String,
    mut node: &'a Value,
    root: &'a Value,
    library: &'a SchemaRefLibrary,
) -> Option<(String, &'a Value)> {
    for _ in 0..32 {
        let Some(target) = placeholder_target(node) else {
            return Some((base, node));
        };
        node = library
            .get(&target)
            .and_then(Option::as_ref)
            .or_else(|| pointer::get(root, &target))?;
        base = target;
    }
    None
}

fn find_property<'a>(node: &'a Value, base: &str, key: &str) -> Option<(String, &'a Value)> {
    if let Some(child) = node.get("properties").and_then(|p| p.get(key)) {
        return Some((pointer::join(&pointer::join(base, "properties"), key), child));
    }
    for kind in combinators(node) {
        for branch in branches(node, kind, base) {
            if let Some(found) = find_property(branch.schema, &branch.pointer, key) {
                return Some(found);
            }
        }
    }
    None
}

/// Translate a data pointer into the schema pointer describing it.
///
/// Recursive `$ref` placeholders are followed through the reference
/// library, so the result may point into `definitions`.
pub fn data_to_schema_pointer(
    data_pointer: &str,
    root: &Value,
    library: &SchemaRefLibrary,
) -> Option<String> {
    let keys = pointer::parse(data_pointer).ok()?;
    let mut base = String::new();
    let mut node = root;
    for key in keys {
        (base, node) = follow_refs(base, node, root, library)?;
        if let Some((child_base, child)) = find_property(node, &base, &key) {
            base = child_base;
            node = child;
            continue;
        }
        let map = node.as_object()?;
        if key == APPEND || pointer::is_index(&key) {
            let index = key.parse::<usize>().ok();
            match map.get("items") {
                Some(Value::Array(tuple)) => match index.filter(|i| *i < tuple.len()) {
                    Some(i) => {
                        base = pointer::join_index(&pointer::join(&base, "items"), i);
                        node = &tuple[i];
                    }
                    None => {
                        let extra = map.get("additionalItems").filter(|v| v.is_object())?;
                        base = pointer::join(&base, "additionalItems");
                        node = extra;
                    }
                },
                Some(items) => {
                    base = pointer::join(&base, "items");
                    node = items;
                }
                None => return None,
            }
        } else {
            let extra = map.get("additionalProperties").filter(|v| v.is_object())?;
            base = pointer::join(&base, "additionalProperties");
            node = extra;
        }
    }
    Some(base)
}

/// Translate a schema pointer into the generic data pointer it describes.
pub fn schema_to_data_pointer(schema_pointer: &str) -> String {
    let Ok(keys) = pointer::parse(schema_pointer) else {
        return String::new();
    };
    let mut data: Vec<String> = Vec::new();
    let mut i = 0;
    while i < keys.len() {
        match keys[i].as_str() {
            "properties" | "patternProperties" => {
                if let Some(name) = keys.get(i + 1) {
                    data.push(name.clone());
                }
                i += 2;
            }
            "items" => match keys.get(i + 1) {
                Some(index) if pointer::is_index(index) => {
                    data.push(index.clone());
                    i += 2;
                }
                _ => {
                    data.push(APPEND.to_string());
                    i += 1;
                }
            },
            "additionalItems" | "additionalProperties" => {
                data.push(APPEND.to_string());
                i += 1;
            }
            "allOf" | "anyOf" | "oneOf" | "definitions" | "$defs" | "dependencies"
            | "dependentSchemas" => i += 2,
            _ => i += 1,
        }
    }
    pointer::compile(&data)
}
