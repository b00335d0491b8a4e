//! Synchronization of control values with the validator.
//!
//! One pass turns the raw value of the control tree into formatted data,
//! validates it with the [`DEFAULT_VALIDATOR`] instance and publishes the
//! outcome on three channels. Data is emitted on every pass; validity and
//! errors only when they changed since the previous pass.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    data::{
        DataMap, coerce,
        data_map::{CombinatorSite, generic_pointer},
    },
    error::{FormError, Result},
    notify::Channel,
    options::FormOptions,
    pointer,
    schema::{self, ResolvedSchema, SchemaType},
    template::validators::select_branches,
    validator::{DEFAULT_VALIDATOR, ValidatorError, ValidatorRegistry},
};

/// Key of errors reported against the data root.
pub const ROOT_ERROR_KEY: &str = "#";

/// Data pointer → error messages, in validator order.
pub type ErrorMap = IndexMap<String, Vec<String>>;

/// Combinator location → indices of its active branches.
///
/// Keys are the indexed data pointer of the level joined with the escaped
/// combinator schema pointer, e.g. `/~1oneOf` for a root `oneOf`.
pub type ActiveBranches = IndexMap<String, Vec<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Destroyed,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub data: Value,
    pub is_valid: bool,
    /// Errors as reported by the validator.
    pub errors: Vec<ValidatorError>,
    /// The same errors keyed by data pointer.
    pub messages: ErrorMap,
    pub active_branches: ActiveBranches,
}

/// Formatted data plus the branches chosen while formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct Formatted {
    pub data: Value,
    pub active_branches: ActiveBranches,
}

/// Format a raw control value for validation.
///
/// Every value is coerced to the type the data map declares for its generic
/// pointer. Values without a data map entry, values that cannot be coerced
/// and empty values are dropped, or kept as `null` with
/// `returnEmptyFields`. At combinator levels the active branches are chosen
/// by matching the value against each branch: properties only inactive
/// branches declare are dropped and the data map switches to the types of
/// the active branches.
pub fn format_data(raw: &Value, resolved: &ResolvedSchema, data_map: &mut DataMap, options: &FormOptions) -> Formatted {
    let mut formatter = Formatter {
        resolved,
        data_map,
        keep_empty: options.return_empty_fields,
        active_branches: IndexMap::new(),
    };
    let data = match formatter.format(raw, "") {
        Some(data) => data,
        None if formatter.keep_empty => Value::Null,
        None if raw.is_object() => Value::Object(Map::new()),
        None => Value::Null,
    };
    Formatted {
        data,
        active_branches: formatter.active_branches,
    }
}

struct Formatter<'a> {
    resolved: &'a ResolvedSchema,
    data_map: &'a mut DataMap,
    keep_empty: bool,
    active_branches: ActiveBranches,
}

impl Formatter<'_> {
    fn generic(&self, indexed: &str) -> String {
        generic_pointer(indexed, &self.resolved.recursive_refs, &self.resolved.array_map)
    }

    fn format(&mut self, value: &Value, indexed: &str) -> Option<Value> {
        let generic = self.generic(indexed);
        let Some(entry) = self.data_map.get(&generic) else {
            debug!("{indexed}: no schema describes this value, dropped");
            return None;
        };
        let sites = entry.combinators.clone();
        let mut dropped = Vec::new();
        for site in &sites {
            dropped.extend(self.select(site, value, indexed, &generic));
        }

        let entry = self.data_map.get(&generic)?;
        let ty = entry.schema_type;
        let nullable = entry.nullable;
        match value {
            Value::Object(map) => {
                if ty.is_some_and(|t| t != SchemaType::Object) {
                    warn!("{}", FormError::mismatch(indexed, ty.map_or("object", SchemaType::as_str), value));
                    return None;
                }
                let mut out = Map::new();
                for (key, child) in map {
                    if dropped.contains(key) {
                        continue;
                    }
                    match self.format(child, &pointer::join(indexed, key)) {
                        Some(child) => {
                            out.insert(key.clone(), child);
                        }
                        None if self.keep_empty => {
                            out.insert(key.clone(), Value::Null);
                        }
                        None => {}
                    }
                }
                Some(Value::Object(out))
            }
            Value::Array(items) => {
                if ty.is_some_and(|t| t != SchemaType::Array) {
                    warn!("{}", FormError::mismatch(indexed, ty.map_or("array", SchemaType::as_str), value));
                    return None;
                }
                // dropped items become null so later items keep their index
                let items = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.format(item, &pointer::join_index(indexed, i))
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                Some(Value::Array(items))
            }
            _ if coerce::is_empty(value) => (nullable && value.is_null()).then_some(Value::Null),
            _ => match ty {
                None => Some(value.clone()),
                Some(ty) => match coerce::coerce(value, ty, indexed) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!("{err}");
                        None
                    }
                },
            },
        }
    }

    /// Pick the active branches of `site` for `value`. Returns the
    /// properties only inactive branches declare.
    fn select(&mut self, site: &CombinatorSite, value: &Value, indexed: &str, generic: &str) -> Vec<String> {
        let resolved = self.resolved;
        let Some(owner) = resolved.subschema(&site.schema_pointer) else {
            return Vec::new();
        };
        let active = select_branches(site.kind, owner, value, resolved, &[]);
        let key = pointer::join(indexed, &site.key());
        debug!("{key}: active branches {active:?}");

        let mut kept: Vec<String> = owner
            .get("properties")
            .and_then(Value::as_object)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        for branch in site.branches.iter().filter(|b| active.contains(&b.index)) {
            kept.extend(branch.properties.iter().cloned());
            let Some(branch_schema) = resolved.subschema(&branch.schema_pointer) else {
                continue;
            };
            if value.is_object() {
                let properties = branch_schema.get("properties").and_then(Value::as_object);
                for (name, property) in properties.into_iter().flatten() {
                    if let Some(ty) = schema::primary_type(property) {
                        self.data_map.switch_type(&pointer::join(generic, name), ty);
                    }
                }
            } else if let Some(ty) = schema::primary_type(branch_schema) {
                self.data_map.switch_type(generic, ty);
            }
        }
        self.active_branches.insert(key, active.clone());

        let mut dropped: Vec<String> = site
            .branches
            .iter()
            .filter(|b| !active.contains(&b.index))
            .flat_map(|b| b.properties.iter())
            .filter(|name| !kept.contains(name))
            .cloned()
            .collect();
        dropped.dedup();
        dropped
    }
}

/// Key validator errors by data pointer.
///
/// `required` errors are reported against the missing property; errors at
/// the data root go under [`ROOT_ERROR_KEY`].
pub fn compile_errors(errors: &[ValidatorError]) -> ErrorMap {
    let mut map = ErrorMap::new();
    for error in errors {
        let pointer = match error.params.get("missingProperty").and_then(Value::as_str) {
            Some(name) if error.keyword == "required" => pointer::join(&error.instance_pointer, name),
            _ => error.instance_pointer.clone(),
        };
        let key = if pointer.is_empty() {
            ROOT_ERROR_KEY.to_string()
        } else {
            pointer
        };
        map.entry(key).or_default().push(error.message.clone());
    }
    map
}

/// Lifecycle and notification channels of one form.
#[derive(Debug)]
pub struct SyncEngine {
    lifecycle: Lifecycle,
    pub data_changes: Channel<Value>,
    pub validity_changes: Channel<bool>,
    pub error_changes: Channel<ErrorMap>,
    last: Option<ValidationResult>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            data_changes: Channel::new(),
            validity_changes: Channel::new(),
            error_changes: Channel::new(),
            last: None,
        }
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// `Uninitialized` → `Active`. A destroyed engine stays destroyed.
    pub fn activate(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Destroyed => Err(FormError::Destroyed),
            _ => {
                self.lifecycle = Lifecycle::Active;
                Ok(())
            }
        }
    }

    /// Drop every subscription and refuse further passes.
    pub fn destroy(&mut self) {
        self.data_changes.clear();
        self.validity_changes.clear();
        self.error_changes.clear();
        self.lifecycle = Lifecycle::Destroyed;
    }

    /// Forget the previous result so the next pass emits everything.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<&ValidationResult> {
        self.last.as_ref()
    }

    fn check_active(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Uninitialized => Err(FormError::NotInitialized),
            Lifecycle::Destroyed => Err(FormError::Destroyed),
        }
    }

    /// Run one pass over the raw control value.
    pub fn pass(
        &mut self,
        raw: &Value,
        resolved: &ResolvedSchema,
        data_map: &mut DataMap,
        options: &FormOptions,
        validators: &mut ValidatorRegistry,
    ) -> Result<&ValidationResult> {
        self.check_active()?;
        let formatted = format_data(raw, resolved, data_map, options);
        let is_valid = validators.validate(DEFAULT_VALIDATOR, &formatted.data)?;
        let errors = validators.errors(DEFAULT_VALIDATOR)?.to_vec();
        let result = ValidationResult {
            messages: compile_errors(&errors),
            data: formatted.data,
            is_valid,
            errors,
            active_branches: formatted.active_branches,
        };

        self.data_changes.emit(&result.data);
        if self.last.as_ref().is_none_or(|last| last.is_valid != result.is_valid) {
            self.validity_changes.emit(&result.is_valid);
        }
        if self.last.as_ref().is_none_or(|last| last.messages != result.messages) {
            self.error_changes.emit(&result.messages);
        }
        Ok(self.last.insert(result))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        data::{FormCompilationContext, FormInput},
        layout::BuiltinWidgets,
    };
    use serde_json::json;

    fn context(schema: Value) -> FormCompilationContext {
        FormCompilationContext::compile(FormInput::new(schema), FormOptions::default(), &BuiltinWidgets::new())
            .unwrap()
    }

    fn format(ctx: &mut FormCompilationContext, raw: Value) -> Formatted {
        format_data(&raw, &ctx.resolved, &mut ctx.data_map, &ctx.options)
    }

    #[test]
    fn test_format_coerces_and_drops() {
        let mut ctx = context(json!({
            "type": "object",
            "properties": {
                "age": {"type": "integer"},
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "number"}}
            }
        }));
        let out = format(&mut ctx, json!({"age": "42", "name": "", "extra": 1, "tags": ["1.5", "x"]}));
        assert_eq!(out.data, json!({"age": 42, "tags": [1.5, null]}));

        ctx.options.return_empty_fields = true;
        let out = format(&mut ctx, json!({"age": "nope", "name": ""}));
        assert_eq!(out.data, json!({"age": null, "name": null}));
    }

    #[test]
    fn test_format_selects_branches() {
        let mut ctx = context(json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}, "a": {"type": "string"}}},
                {"properties": {"kind": {"const": "b"}, "b": {"type": "integer"}}}
            ]
        }));
        let out = format(&mut ctx, json!({"kind": "b", "a": "left over", "b": "2"}));
        assert_eq!(out.data, json!({"kind": "b", "b": 2}));
        assert_eq!(out.active_branches["/~1oneOf"], vec![1]);
    }

    #[test]
    fn test_format_drops_unknown_and_mistyped_values() {
        let mut ctx = context(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "meta": {"type": "object", "properties": {"x": {"type": "string"}}}
            }
        }));
        let out = format(
            &mut ctx,
            json!({"name": {"a": 1}, "count": [1], "meta": {"x": "ok", "y": 2}, "stray": {"z": true}}),
        );
        assert_eq!(out.data, json!({"meta": {"x": "ok"}}));
    }

    #[test]
    fn test_format_any_of_keeps_every_match() {
        let mut ctx = context(json!({
            "type": "object",
            "properties": {"label": {"type": "string"}},
            "anyOf": [
                {"properties": {"email": {"type": "string"}}, "required": ["email"]},
                {"properties": {"phone": {"type": "string"}}, "required": ["phone"]}
            ]
        }));
        let out = format(&mut ctx, json!({"label": "me", "email": "a@b.c", "phone": "123"}));
        assert_eq!(out.active_branches["/~1anyOf"], vec![0, 1]);
        assert_eq!(out.data, json!({"label": "me", "email": "a@b.c", "phone": "123"}));

        let out = format(&mut ctx, json!({"label": "me", "email": "", "phone": "123"}));
        assert_eq!(out.active_branches["/~1anyOf"], vec![1]);
        assert_eq!(out.data, json!({"label": "me", "phone": "123"}));
    }

    #[test]
    fn test_format_all_of_activates_every_branch() {
        let mut ctx = context(json!({
            "type": "object",
            "allOf": [
                {"properties": {"a": {"type": "integer"}}},
                {"properties": {"b": {"type": "boolean"}}}
            ]
        }));
        let out = format(&mut ctx, json!({"a": "1", "b": "true"}));
        assert_eq!(out.active_branches["/~1allOf"], vec![0, 1]);
        assert_eq!(out.data, json!({"a": 1, "b": true}));
    }

    #[test]
    fn test_format_if_then_else_follows_condition() {
        let mut ctx = context(json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "if": {"properties": {"kind": {"const": "num"}}},
            "then": {"properties": {"value": {"type": "integer"}}},
            "else": {"properties": {"value": {"type": "string"}, "note": {"type": "string"}}}
        }));
        let out = format(&mut ctx, json!({"kind": "num", "value": "7", "note": "x"}));
        assert_eq!(out.active_branches["/~1if"], vec![0]);
        assert_eq!(out.data, json!({"kind": "num", "value": 7}));

        let out = format(&mut ctx, json!({"kind": "text", "value": "7", "note": "x"}));
        assert_eq!(out.active_branches["/~1if"], vec![1]);
        assert_eq!(out.data, json!({"kind": "text", "value": "7", "note": "x"}));
    }

    #[test]
    fn test_compile_errors() {
        let errors = vec![
            ValidatorError {
                instance_pointer: String::new(),
                message: "\"name\" is a required property".into(),
                keyword: "required".into(),
                params: json!({"missingProperty": "name"}).as_object().cloned().unwrap(),
            },
            ValidatorError {
                instance_pointer: String::new(),
                message: "too few properties".into(),
                keyword: "minProperties".into(),
                params: Map::new(),
            },
        ];
        let map = compile_errors(&errors);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["/name", ROOT_ERROR_KEY]);
    }

    #[test]
    fn test_pass_emits_on_change() {
        let mut ctx = context(json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}}
        }));
        let mut validators = ValidatorRegistry::default();
        validators.register(DEFAULT_VALIDATOR, &ctx.schema).unwrap();
        let mut engine = SyncEngine::new();
        assert!(matches!(
            engine.pass(&json!({}), &ctx.resolved, &mut ctx.data_map, &ctx.options, &mut validators),
            Err(FormError::NotInitialized)
        ));
        engine.activate().unwrap();

        let data = Rc::new(RefCell::new(0));
        let validity = Rc::new(RefCell::new(Vec::new()));
        let (d, v) = (data.clone(), validity.clone());
        engine.data_changes.subscribe(move |_| *d.borrow_mut() += 1);
        engine.validity_changes.subscribe(move |ok| v.borrow_mut().push(*ok));

        for raw in [json!({"name": null}), json!({"name": ""}), json!({"name": "x"})] {
            engine
                .pass(&raw, &ctx.resolved, &mut ctx.data_map, &ctx.options, &mut validators)
                .unwrap();
        }
        assert_eq!(*data.borrow(), 3);
        assert_eq!(*validity.borrow(), vec![false, true]);
        assert!(engine.last().unwrap().messages.is_empty());

        engine.destroy();
        assert_eq!(engine.data_changes.len(), 0);
        assert!(matches!(engine.activate(), Err(FormError::Destroyed)));
    }
}
