//! Building the control template from a resolved schema.
//!
//! The builder walks the resolved schema once, seeded with the caller's
//! initial data, and records what it learns about every field in the data
//! map as it goes. List item templates and the targets of recursive
//! references are built once into the [`TemplateRefLibrary`] and only
//! referenced from the tree.

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    BranchTemplate, ConditionalTemplate, ControlTemplate, GroupTemplate, LeafTemplate, ListTemplate,
    RefTemplate, TemplateRefLibrary, ValidatorSet, branch_pointer, child_pointer,
};
use crate::{
    data::data_map::{ArraySizing, BranchRef, BranchSite, CombinatorSite, DataMap, generic_pointer},
    error::FormError,
    options::FormOptions,
    pointer::{self, APPEND},
    schema::{self, CombinatorKind, ResolvedSchema, SchemaType},
};

/// Pointers locating the node being built.
#[derive(Debug, Clone, Default)]
struct Site {
    schema: String,
    data: String,
    template: String,
}

impl Site {
    fn property(&self, key: &str) -> Site {
        Site {
            schema: pointer::join(&pointer::join(&self.schema, "properties"), key),
            data: pointer::join(&self.data, key),
            template: child_pointer(&self.template, key),
        }
    }

    fn item(&self, schema: String, index: usize) -> Site {
        Site {
            schema,
            data: pointer::join_index(&self.data, index),
            template: child_pointer(&self.template, &index.to_string()),
        }
    }
}

/// Caller data and inherited defaults at the node being built.
#[derive(Debug, Clone, Copy, Default)]
struct Seed<'v> {
    value: Option<&'v Value>,
    default: Option<&'v Value>,
}

impl<'v> Seed<'v> {
    fn key(&self, key: &str) -> Seed<'v> {
        Seed {
            value: self.value.and_then(|v| v.get(key)),
            default: self.default.and_then(|v| v.get(key)),
        }
    }

    fn index(&self, index: usize) -> Seed<'v> {
        Seed {
            value: self.value.and_then(|v| v.get(index)),
            default: self.default.and_then(|v| v.get(index)),
        }
    }
}

/// Output of [`build_template`] besides the data map updates.
#[derive(Debug, Default)]
pub struct TemplateOutput {
    pub root: Option<ControlTemplate>,
    pub library: TemplateRefLibrary,
    pub diagnostics: Vec<FormError>,
}

/// Build the control template of `resolved`, seeded with `data`.
pub fn build_template(
    resolved: &ResolvedSchema,
    options: &FormOptions,
    data: Option<&Value>,
    data_map: &mut DataMap,
) -> TemplateOutput {
    let mut builder = TemplateBuilder {
        resolved,
        options,
        schema_defaults: options.set_schema_defaults.applies(data.is_some()),
        data_map,
        out: TemplateOutput::default(),
        root_copies: IndexMap::new(),
    };
    let seed = Seed {
        value: data,
        default: None,
    };
    let root = builder.build(&resolved.schema, &Site::default(), seed, false);
    let root_copies = std::mem::take(&mut builder.root_copies);
    let mut out = builder.out;

    out.root = match root {
        Some(ControlTemplate::Group(mut group)) => {
            for (key, template) in root_copies {
                group.controls.entry(key).or_insert(template);
            }
            Some(ControlTemplate::Group(group))
        }
        other => {
            if !root_copies.is_empty() {
                debug!("root is not a group, dropping {} branch copies", root_copies.len());
            }
            other
        }
    };
    debug!(
        "control template: {} nodes, {} library entries",
        out.root.as_ref().map_or(0, ControlTemplate::size),
        out.library.len()
    );
    out
}

struct TemplateBuilder<'a> {
    resolved: &'a ResolvedSchema,
    options: &'a FormOptions,
    schema_defaults: bool,
    data_map: &'a mut DataMap,
    out: TemplateOutput,
    root_copies: IndexMap<String, ControlTemplate>,
}

impl<'a> TemplateBuilder<'a> {
    fn generic(&self, data_pointer: &str) -> String {
        generic_pointer(
            data_pointer,
            &self.resolved.recursive_refs,
            &self.resolved.array_map,
        )
    }

    fn register(&mut self, generic: &str, schema: &Value, site: &Site, required: bool) {
        let entry = self.data_map.entry(generic);
        if entry.schema_pointer.is_none() {
            entry.schema_pointer = Some(site.schema.clone());
            entry.template_pointer = Some(site.template.clone());
            entry.required = required;
            entry.disabled = schema.get("readOnly") == Some(&Value::Bool(true));
        }
        self.data_map
            .set_type_once(generic, schema::primary_type(schema), schema::is_nullable(schema));
    }

    fn build(&mut self, schema: &'a Value, site: &Site, seed: Seed<'_>, required: bool) -> Option<ControlTemplate> {
        if let Some(target) = schema::placeholder_target(schema) {
            return self.build_ref(&target, site);
        }
        match schema {
            Value::Bool(false) => return None,
            Value::Object(_) => {}
            _ => return Some(leaf(seed.value.cloned().unwrap_or(Value::Null), ValidatorSet::default(), false)),
        }

        let generic = self.generic(&site.data);
        self.register(&generic, schema, site, required);
        let disabled = schema.get("readOnly") == Some(&Value::Bool(true));

        match schema::primary_type(schema) {
            Some(SchemaType::Object) => Some(self.build_group(schema, site, &generic, seed, disabled)),
            Some(SchemaType::Array) => Some(self.build_list(schema, site, &generic, seed, disabled)),
            _ if schema::title_map(schema).is_empty() && !schema::combinators(schema).is_empty() => {
                self.build_conditional_leaf(schema, site, &generic, seed)
            }
            _ => {
                let value = match seed.value {
                    Some(value) => value.clone(),
                    None => self
                        .schema_defaults
                        .then(|| schema.get("default"))
                        .flatten()
                        .or(seed.default)
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                Some(leaf(value, ValidatorSet::from_schema(schema, required), disabled))
            }
        }
    }

    fn build_group(
        &mut self,
        schema: &'a Value,
        site: &Site,
        generic: &str,
        seed: Seed<'_>,
        disabled: bool,
    ) -> ControlTemplate {
        let own_default = self.schema_defaults.then(|| schema.get("default")).flatten();
        let seed = Seed {
            value: seed.value,
            default: own_default.filter(|d| d.is_object()).or(seed.default),
        };
        let mut controls = IndexMap::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub) in properties {
                let required = schema::is_required(schema, key);
                if let Some(child) = self.build(sub, &site.property(key), seed.key(key), required) {
                    controls.insert(key.clone(), child);
                }
            }
        }
        for kind in schema::combinators(schema) {
            let (key, conditional) = self.build_conditional(schema, kind, site, generic, seed);
            controls.insert(key, conditional);
        }
        ControlTemplate::Group(GroupTemplate {
            controls,
            validators: ValidatorSet::from_schema(schema, false),
            disabled,
        })
    }

    /// Build one combinator of `owner` into a [`ConditionalTemplate`].
    ///
    /// Every branch is also copied under a synthetic root key (its escaped
    /// schema pointer), with a data map entry pointing back at this site.
    fn build_conditional(
        &mut self,
        owner: &'a Value,
        kind: CombinatorKind,
        site: &Site,
        generic: &str,
        seed: Seed<'_>,
    ) -> (String, ControlTemplate) {
        let key = pointer::escape(&pointer::join(&site.schema, kind.keyword()));
        let conditional_pointer = child_pointer(&site.template, &key);
        let object_level = schema::primary_type(owner) == Some(SchemaType::Object);

        let mut built = Vec::new();
        let mut sites = Vec::new();
        for branch in schema::branches(owner, kind, &site.schema) {
            let branch_site = Site {
                schema: branch.pointer.clone(),
                data: site.data.clone(),
                template: branch_pointer(&conditional_pointer, branch.index),
            };
            let branch_object = object_level
                && schema::primary_type(branch.schema).is_none_or(|t| t == SchemaType::Object);
            let template = if branch_object {
                Some(self.build_group(branch.schema, &branch_site, generic, seed, false))
            } else {
                self.build(branch.schema, &branch_site, seed, false)
            };
            let root_key = pointer::escape(&branch.pointer);
            sites.push(BranchSite {
                index: branch.index,
                schema_pointer: branch.pointer.clone(),
                root_key: root_key.clone(),
                properties: schema::property_names(branch.schema),
            });
            let Some(template) = template else {
                continue;
            };

            let root_pointer = pointer::branch_root_pointer(&branch.pointer);
            let entry = self.data_map.entry(&root_pointer);
            if entry.branch.is_none() {
                entry.branch = Some(BranchRef {
                    kind,
                    index: branch.index,
                    data_pointer: generic.to_string(),
                });
                entry.schema_pointer = Some(branch.pointer.clone());
                entry.template_pointer = Some(child_pointer("", &root_key));
                entry.schema_type = schema::primary_type(branch.schema).or(Some(SchemaType::Object));
            }
            self.root_copies.entry(root_key).or_insert_with(|| template.clone());
            built.push(BranchTemplate {
                index: branch.index,
                schema_pointer: branch.pointer,
                template,
            });
        }

        let combinator_site = CombinatorSite {
            kind,
            schema_pointer: site.schema.clone(),
            branches: sites,
        };
        let entry = self.data_map.entry(generic);
        if !entry.combinators.iter().any(|c| c.key() == combinator_site.key()) {
            entry.combinators.push(combinator_site);
        }

        (
            key,
            ControlTemplate::Conditional(ConditionalTemplate {
                kind,
                schema_pointer: site.schema.clone(),
                branches: built,
            }),
        )
    }

    /// A scalar position whose alternatives come from combinators.
    fn build_conditional_leaf(
        &mut self,
        schema: &'a Value,
        site: &Site,
        generic: &str,
        seed: Seed<'_>,
    ) -> Option<ControlTemplate> {
        let mut kinds = schema::combinators(schema).into_iter();
        let kind = kinds.next()?;
        if kinds.next().is_some() {
            debug!("{}: only the first combinator of a scalar is used", site.schema);
        }
        let (_, conditional) = self.build_conditional(schema, kind, site, generic, seed);
        Some(conditional)
    }

    fn build_list(
        &mut self,
        schema: &'a Value,
        site: &Site,
        generic: &str,
        seed: Seed<'_>,
        disabled: bool,
    ) -> ControlTemplate {
        let own_default = self.schema_defaults.then(|| schema.get("default")).flatten();
        let seed = Seed {
            value: seed.value,
            default: own_default.filter(|d| d.is_array()).or(seed.default),
        };
        let items_pointer = pointer::join(&site.schema, "items");
        let (tuple, item) = schema::array_items(schema, &site.schema);
        let seeded_len = seed
            .value
            .or(seed.default)
            .and_then(Value::as_array)
            .map(Vec::len);
        let sizing = ArraySizing::for_schema(
            schema,
            tuple.len(),
            item.is_some(),
            seeded_len,
            self.options.default_widget_options.list_items,
        );
        let list_items = sizing.list_items;
        self.data_map.entry(generic).array.get_or_insert(sizing);

        let mut controls = Vec::with_capacity(tuple.len() + list_items);
        for (i, sub) in tuple.iter().enumerate() {
            let site = site.item(pointer::join_index(&items_pointer, i), i);
            if let Some(child) = self.build(sub, &site, seed.index(i), false) {
                controls.push(child);
            }
        }

        let item_ref = item.map(|(item_schema, item_pointer)| {
            let key = self.generic(&pointer::join(&site.data, APPEND));
            if !self.out.library.contains_key(&key) {
                self.out.library.insert(key.clone(), None);
                let item_site = Site {
                    schema: item_pointer.clone(),
                    data: pointer::join(&site.data, APPEND),
                    template: String::new(),
                };
                match self.build(item_schema, &item_site, Seed::default(), false) {
                    Some(template) => {
                        self.out.library.insert(key.clone(), Some(template));
                    }
                    None => {
                        self.out.library.shift_remove(&key);
                    }
                }
            }
            for i in tuple.len()..tuple.len() + list_items {
                let child_site = site.item(item_pointer.clone(), i);
                if let Some(child) = self.build(item_schema, &child_site, seed.index(i), false) {
                    controls.push(child);
                }
            }
            key
        });

        ControlTemplate::List(ListTemplate {
            controls,
            item_ref,
            tuple_items: tuple.len(),
            min_items: sizing.min_items,
            validators: ValidatorSet::from_schema(schema, false),
            disabled,
        })
    }

    /// A recursive `$ref`: build its target once into the library and leave
    /// a reference in the tree.
    fn build_ref(&mut self, target: &str, site: &Site) -> Option<ControlTemplate> {
        let key = format!("#{target}");
        let raw_generic = pointer::to_generic(&site.data, &self.resolved.array_map);
        let target_data = self
            .resolved
            .recursive_refs
            .get(&raw_generic)
            .cloned()
            .unwrap_or_else(|| schema::schema_to_data_pointer(target));

        if !self.out.library.contains_key(&key) {
            let Some(target_schema) = self.resolved.subschema(target) else {
                let err = FormError::TemplateNotFound(key);
                error!("{err}");
                self.out.diagnostics.push(err);
                return None;
            };
            self.out.library.insert(key.clone(), None);
            let target_site = Site {
                schema: target.to_string(),
                data: target_data,
                template: String::new(),
            };
            match self.build(target_schema, &target_site, Seed::default(), false) {
                Some(template) => {
                    self.out.library.insert(key.clone(), Some(template));
                }
                None => {
                    self.out.library.shift_remove(&key);
                    return None;
                }
            }
        }

        let generic = self.generic(&site.data);
        let entry = self.data_map.entry(&raw_generic);
        if raw_generic != generic && entry.recursive_ref.is_none() {
            entry.recursive_ref = Some(key.clone());
        }
        Some(ControlTemplate::Ref(RefTemplate {
            pointer: key,
            recursive: true,
        }))
    }
}

fn leaf(value: Value, validators: ValidatorSet, disabled: bool) -> ControlTemplate {
    ControlTemplate::Leaf(LeafTemplate {
        value,
        validators,
        disabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::Policy, schema::resolve};
    use serde_json::json;

    fn build(schema: Value, data: Option<Value>, options: &FormOptions) -> (TemplateOutput, DataMap) {
        let resolved = resolve(&schema);
        let mut data_map = DataMap::new();
        let out = build_template(&resolved, options, data.as_ref(), &mut data_map);
        (out, data_map)
    }

    fn leaf_value(root: &ControlTemplate, template_pointer: &str) -> Value {
        match root.get(template_pointer) {
            Some(ControlTemplate::Leaf(leaf)) => leaf.value.clone(),
            other => panic!("not a leaf at {template_pointer}: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_follow_policy() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "default": "anon"},
                "age": {"type": "integer", "default": 3}
            }
        });
        let options = FormOptions::default();

        let (out, _) = build(schema.clone(), None, &options);
        let root = out.root.unwrap();
        assert_eq!(leaf_value(&root, "/controls/name"), json!("anon"));

        let (out, _) = build(schema.clone(), Some(json!({"age": 7})), &options);
        let root = out.root.unwrap();
        assert_eq!(leaf_value(&root, "/controls/name"), Value::Null);
        assert_eq!(leaf_value(&root, "/controls/age"), json!(7));

        let always = FormOptions {
            set_schema_defaults: Policy::Always,
            ..FormOptions::default()
        };
        let (out, _) = build(schema, Some(json!({"age": 7})), &always);
        let root = out.root.unwrap();
        assert_eq!(leaf_value(&root, "/controls/name"), json!("anon"));
        assert_eq!(leaf_value(&root, "/controls/age"), json!(7));
    }

    #[test]
    fn test_list_items_and_library() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 3},
                "pair": {"type": "array", "items": [{"type": "string"}, {"type": "integer"}]}
            }
        });
        let (out, data_map) = build(schema, None, &FormOptions::default());
        let root = out.root.unwrap();
        let Some(ControlTemplate::List(tags)) = root.get("/controls/tags") else {
            panic!("tags is not a list");
        };
        assert_eq!(tags.controls.len(), 1);
        assert_eq!(tags.item_ref.as_deref(), Some("/tags/-"));
        assert!(matches!(out.library.get("/tags/-"), Some(Some(ControlTemplate::Leaf(_)))));

        let Some(ControlTemplate::List(pair)) = root.get("/controls/pair") else {
            panic!("pair is not a list");
        };
        assert_eq!(pair.controls.len(), 2);
        assert_eq!(pair.item_ref, None);
        assert_eq!(data_map.get("/pair/1").unwrap().schema_type, Some(SchemaType::Integer));
        assert_eq!(data_map.get("/tags").unwrap().array.unwrap().max_items, Some(3));
    }

    #[test]
    fn test_seed_data_sizes_lists() {
        let schema = json!({"type": "array", "items": {"type": "integer"}});
        let (out, _) = build(schema, Some(json!([1, 2, 3])), &FormOptions::default());
        let Some(ControlTemplate::List(list)) = out.root else {
            panic!("root is not a list");
        };
        assert_eq!(list.controls.len(), 3);
    }

    #[test]
    fn test_recursive_reference_is_finite() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "child": {"$ref": "#"}}
        });
        let (out, data_map) = build(schema, None, &FormOptions::default());
        let root = out.root.unwrap();
        assert!(matches!(
            root.get("/controls/child"),
            Some(ControlTemplate::Ref(RefTemplate { pointer, recursive: true })) if pointer == "#"
        ));
        assert!(matches!(out.library.get("#"), Some(Some(ControlTemplate::Group(_)))));
        assert_eq!(data_map.get("/child").unwrap().recursive_ref.as_deref(), Some("#"));
    }

    #[test]
    fn test_one_of_registers_root_keys() {
        let schema = json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}, "a": {"type": "string"}}},
                {"properties": {"kind": {"const": "b"}, "b": {"type": "integer"}}}
            ]
        });
        let (out, data_map) = build(schema, None, &FormOptions::default());
        let Some(ControlTemplate::Group(root)) = out.root else {
            panic!("root is not a group");
        };
        let Some(ControlTemplate::Conditional(cond)) = root.controls.get("~1oneOf") else {
            panic!("missing conditional");
        };
        assert_eq!(cond.branches.len(), 2);
        assert!(root.controls.contains_key("~1oneOf~10"));
        assert!(root.controls.contains_key("~1oneOf~11"));

        let entry = data_map.get("/~1oneOf~11").unwrap();
        assert_eq!(entry.branch.as_ref().unwrap().index, 1);
        assert_eq!(data_map.get("").unwrap().combinators.len(), 1);
        assert_eq!(data_map.get("/b").unwrap().schema_type, Some(SchemaType::Integer));
    }
}
