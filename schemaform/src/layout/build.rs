//! Layout synthesis.
//!
//! Without a user layout the whole tree is synthesized from the schema. With
//! one, every element is merged with the schema node its `key` names and
//! `"*"` expands to the synthesized children of the root that no element
//! names explicitly.
//!
//! List item layouts and recursive `$ref` targets are built once into the
//! [`LayoutRefLibrary`]; every use is a clone with fresh ids whose data
//! pointers are re-based onto the position it is used at.

use std::sync::LazyLock;

use serde_json::{Map, Value};

use super::{
    ArrayItemType, Condition, LayoutNode, LayoutRefLibrary, WidgetKind, WidgetRegistry, widget_for,
};
use crate::{
    data::data_map::{ArraySizing, DataMap, generic_pointer},
    error::FormError,
    options::{FormOptions, Policy},
    pointer::{self, APPEND},
    schema::{self, Branch, CombinatorKind, ResolvedSchema, SchemaType},
    template::{ControlTemplate, ValidatorSet, validators::select_branches},
};

static ANY_SCHEMA: LazyLock<Value> = LazyLock::new(|| Value::Object(Map::new()));

/// Read-only inputs of [`build_layout`].
#[derive(Clone, Copy)]
pub struct LayoutInput<'a> {
    pub resolved: &'a ResolvedSchema,
    pub options: &'a FormOptions,
    /// The caller's layout array, if any.
    pub user_layout: Option<&'a [Value]>,
    /// The caller's initial data, if any.
    pub data: Option<&'a Value>,
    pub widgets: &'a dyn WidgetRegistry,
}

/// Output of [`build_layout`] besides the data map and template updates.
#[derive(Debug)]
pub struct LayoutOutput {
    pub root: LayoutNode,
    pub library: LayoutRefLibrary,
    pub diagnostics: Vec<FormError>,
    /// Id counter to continue from when nodes are added later.
    pub next_id: u64,
}

/// Next layout node id from `counter`.
pub fn next_node_id(counter: &mut u64) -> String {
    *counter += 1;
    format!("n{counter}")
}

/// Clone the library entry `key` for use at `data_pointer`.
///
/// Returns `None` when the entry is missing or still being built.
pub fn instantiate(
    library: &LayoutRefLibrary,
    key: &str,
    data_pointer: &str,
    counter: &mut u64,
) -> Option<LayoutNode> {
    let mut node = library.get(key)?.clone()?;
    let from = node.data_pointer.clone().unwrap_or_default();
    node.rebase(&from, data_pointer);
    node.refresh_ids(&mut || next_node_id(counter));
    Some(node)
}

/// Build the layout tree.
///
/// Layout `default` values are written into the leaves of `template` when
/// `setLayoutDefaults` applies.
pub fn build_layout(
    input: LayoutInput<'_>,
    data_map: &mut DataMap,
    template: Option<&mut ControlTemplate>,
) -> LayoutOutput {
    let has_data = input.data.is_some();
    let mut builder = LayoutBuilder {
        resolved: input.resolved,
        options: input.options,
        data: input.data,
        widgets: input.widgets,
        schema_defaults: input.options.set_schema_defaults.applies(has_data),
        layout_defaults: input.options.set_layout_defaults.applies(has_data),
        data_map,
        template,
        used_keys: Vec::new(),
        library: LayoutRefLibrary::new(),
        diagnostics: Vec::new(),
        next_id: 0,
    };

    let mut root = match input.user_layout {
        Some(elements) => {
            collect_keys(elements, &mut builder.used_keys);
            let mut root = builder.section_root();
            root.items = builder.user_items(elements, "");
            root
        }
        None => match builder.node_for(&input.resolved.schema, &At::default(), input.data, None, false) {
            Some(node) if node.widget.is_container() => node,
            Some(node) => {
                let mut root = builder.section_root();
                root.items.push(node);
                root
            }
            None => builder.section_root(),
        },
    };

    let wants_submit = match input.options.add_submit {
        Policy::Always => true,
        Policy::Auto => input.user_layout.is_some(),
        Policy::Never => false,
    };
    if wants_submit && !contains_widget(&root, &WidgetKind::Submit) && builder.widget_ok(&WidgetKind::Submit) {
        let mut submit = LayoutNode::new(builder.next_id(), WidgetKind::Submit);
        submit.options.title = Some("Submit".into());
        submit.handle = builder.widgets.get_widget(&WidgetKind::Submit);
        root.items.push(submit);
    }

    debug!(
        "layout: {} nodes, {} library entries, {} diagnostics",
        root.size(),
        builder.library.len(),
        builder.diagnostics.len()
    );
    LayoutOutput {
        root,
        library: builder.library,
        diagnostics: builder.diagnostics,
        next_id: builder.next_id,
    }
}

/// Pointers locating the node being built.
///
/// `data` is indexed and drives seed lookups and the data map; `layout` is
/// what ends up on the node, with `-` for list items.
#[derive(Debug, Clone, Default)]
struct At {
    schema: String,
    data: String,
    layout: String,
}

impl At {
    fn property(&self, key: &str) -> At {
        At {
            schema: pointer::join(&pointer::join(&self.schema, "properties"), key),
            data: pointer::join(&self.data, key),
            layout: pointer::join(&self.layout, key),
        }
    }

    fn tuple(&self, schema: String, index: usize) -> At {
        At {
            schema,
            data: pointer::join_index(&self.data, index),
            layout: pointer::join_index(&self.layout, index),
        }
    }

    fn list(&self, schema: String, index: usize) -> At {
        At {
            schema,
            data: pointer::join_index(&self.data, index),
            layout: pointer::join(&self.layout, APPEND),
        }
    }
}

struct LayoutBuilder<'a> {
    resolved: &'a ResolvedSchema,
    options: &'a FormOptions,
    data: Option<&'a Value>,
    widgets: &'a dyn WidgetRegistry,
    schema_defaults: bool,
    layout_defaults: bool,
    data_map: &'a mut DataMap,
    template: Option<&'a mut ControlTemplate>,
    /// Data pointers named by the user layout, excluded from `"*"`.
    used_keys: Vec<String>,
    library: LayoutRefLibrary,
    diagnostics: Vec<FormError>,
    next_id: u64,
}

impl<'a> LayoutBuilder<'a> {
    fn next_id(&mut self) -> String {
        next_node_id(&mut self.next_id)
    }

    fn generic(&self, data_pointer: &str) -> String {
        generic_pointer(
            data_pointer,
            &self.resolved.recursive_refs,
            &self.resolved.array_map,
        )
    }

    fn diagnose(&mut self, err: FormError) {
        error!("{err}");
        self.diagnostics.push(err);
    }

    fn invalid(&mut self, path: &str, reason: String) {
        self.diagnose(FormError::InvalidLayout {
            path: path.to_string(),
            reason,
        });
    }

    fn widget_ok(&mut self, kind: &WidgetKind) -> bool {
        if self.widgets.has_widget(kind) {
            return true;
        }
        self.diagnose(FormError::UnknownWidget(kind.to_string()));
        false
    }

    fn section_root(&mut self) -> LayoutNode {
        let mut root = LayoutNode::new(self.next_id(), WidgetKind::Section);
        root.data_pointer = Some(String::new());
        root.schema_pointer = Some(String::new());
        root.options.title = self
            .resolved
            .schema
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        root.handle = self.widgets.get_widget(&WidgetKind::Section);
        root
    }

    /// Synthesize the node for `schema`, or `None` if it has no layout.
    fn node_for(
        &mut self,
        schema: &'a Value,
        at: &At,
        seed: Option<&'a Value>,
        name: Option<&str>,
        required: bool,
    ) -> Option<LayoutNode> {
        if let Some(target) = schema::placeholder_target(schema) {
            return self.ref_node(&target, at, seed, name, required);
        }
        let schema: &'a Value = match schema {
            Value::Bool(false) => return None,
            Value::Object(_) => schema,
            _ => &*ANY_SCHEMA,
        };
        let seed = seed.or_else(|| self.schema_defaults.then(|| schema.get("default")).flatten());

        let widget = widget_for(schema);
        if !self.widget_ok(&widget) {
            return None;
        }
        let mut node = self.base_node(schema, at, name, required, widget);
        match schema::primary_type(schema) {
            Some(SchemaType::Object) if node.widget.is_container() => {
                node.items = self.object_items(schema, at, seed);
            }
            Some(SchemaType::Array) if node.widget.is_array() => {
                self.array_items(&mut node, schema, at, seed);
            }
            _ => {}
        }
        Some(node)
    }

    fn base_node(
        &mut self,
        schema: &Value,
        at: &At,
        name: Option<&str>,
        required: bool,
        widget: WidgetKind,
    ) -> LayoutNode {
        let config = self.options;
        let mut node = LayoutNode::new(self.next_id(), widget);
        node.name = name.map(str::to_string);
        node.data_pointer = Some(at.layout.clone());
        node.schema_pointer = Some(at.schema.clone());
        node.handle = self.widgets.get_widget(&node.widget);

        let defaults = &config.default_widget_options;
        let options = &mut node.options;
        options.title = schema
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                name.filter(|n| *n != APPEND && !pointer::is_index(n))
                    .map(schema::humanize)
            });
        options.description = schema
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        options.required = required;
        options.read_only = schema.get("readOnly") == Some(&Value::Bool(true));
        options.validators = ValidatorSet::from_schema(schema, required);
        options.title_map = schema::title_map(schema);
        options.default = schema.get("default").cloned();
        options.addable = defaults.addable;
        options.orderable = defaults.orderable;
        options.removable = defaults.removable;
        options.extra = defaults.extra.clone();
        if let Some(hints) = schema.get("x-schema-form").and_then(Value::as_object) {
            for (key, value) in hints {
                if key != "type" && key != "widget" {
                    options.extra.insert(key.clone(), value.clone());
                }
            }
        }

        let generic = self.generic(&at.data);
        if let Some(entry) = self.data_map.get_mut(&generic)
            && entry.widget.is_none()
        {
            entry.widget = Some(node.widget.clone());
        }
        node
    }

    /// Children of an object node: its properties, then its combinators.
    fn object_items(&mut self, schema: &'a Value, at: &At, seed: Option<&'a Value>) -> Vec<LayoutNode> {
        let mut items: Vec<LayoutNode> = Vec::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub) in properties {
                let required = schema::is_required(schema, key);
                let child_seed = seed.and_then(|s| s.get(key));
                if let Some(node) = self.node_for(sub, &at.property(key), child_seed, Some(key), required) {
                    items.push(node);
                }
            }
        }

        for kind in schema::combinators(schema) {
            let branches = schema::branches(schema, kind, &at.schema);
            match kind {
                CombinatorKind::AllOf | CombinatorKind::AnyOf => {
                    for branch in &branches {
                        for node in self.branch_items(branch, at, seed) {
                            let duplicate = node.name.is_some() && items.iter().any(|i| i.name == node.name);
                            if !duplicate {
                                items.push(node);
                            }
                        }
                    }
                }
                CombinatorKind::IfThenElse => {
                    let if_pointer = pointer::join(&at.schema, "if");
                    for branch in &branches {
                        for mut node in self.branch_items(branch, at, seed) {
                            node.options.condition = Some(Condition {
                                if_pointer: if_pointer.clone(),
                                negate: branch.negated,
                            });
                            node.options.conditional_group = Some(kind);
                            items.push(node);
                        }
                    }
                }
                CombinatorKind::OneOf => {
                    if let Some(node) = self.one_of_node(schema, &branches, at, seed) {
                        items.push(node);
                    }
                }
            }
        }
        items
    }

    fn branch_items(&mut self, branch: &Branch<'a>, at: &At, seed: Option<&'a Value>) -> Vec<LayoutNode> {
        let branch_at = At {
            schema: branch.pointer.clone(),
            ..at.clone()
        };
        let object_like = branch.schema.is_object()
            && schema::placeholder_target(branch.schema).is_none()
            && schema::primary_type(branch.schema).is_none_or(|t| t == SchemaType::Object);
        if object_like {
            self.object_items(branch.schema, &branch_at, seed)
        } else {
            self.node_for(branch.schema, &branch_at, seed, None, false)
                .into_iter()
                .collect()
        }
    }

    /// A tab selector with one tab per `oneOf` branch.
    fn one_of_node(
        &mut self,
        owner: &'a Value,
        branches: &[Branch<'a>],
        at: &At,
        seed: Option<&'a Value>,
    ) -> Option<LayoutNode> {
        if !self.widget_ok(&WidgetKind::OneOf) || !self.widget_ok(&WidgetKind::Tab) {
            return None;
        }
        let mut selector = LayoutNode::new(self.next_id(), WidgetKind::OneOf);
        selector.data_pointer = Some(at.layout.clone());
        selector.schema_pointer = Some(pointer::join(&at.schema, "oneOf"));
        selector.handle = self.widgets.get_widget(&WidgetKind::OneOf);
        let selected = seed
            .and_then(|value| {
                select_branches(CombinatorKind::OneOf, owner, value, self.resolved, &[])
                    .first()
                    .copied()
            })
            .unwrap_or(0);
        selector.options.selected_branch = Some(selected);

        for branch in branches {
            let mut tab = LayoutNode::new(self.next_id(), WidgetKind::Tab);
            tab.data_pointer = Some(at.layout.clone());
            tab.schema_pointer = Some(branch.pointer.clone());
            tab.handle = self.widgets.get_widget(&WidgetKind::Tab);
            tab.options.title = Some(
                branch
                    .schema
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Option {}", branch.index + 1)),
            );
            tab.items = self.branch_items(branch, at, seed);
            selector.items.push(tab);
        }
        Some(selector)
    }

    fn array_items(&mut self, node: &mut LayoutNode, schema: &'a Value, at: &At, seed: Option<&'a Value>) {
        let (tuple, item) = schema::array_items(schema, &at.schema);
        let sizing = ArraySizing::for_schema(
            schema,
            tuple.len(),
            item.is_some(),
            seed.and_then(Value::as_array).map(Vec::len),
            self.options.default_widget_options.list_items,
        );
        node.options.array = Some(sizing);
        let removable = node.options.removable;

        let items_pointer = pointer::join(&at.schema, "items");
        for (i, sub) in tuple.iter().enumerate() {
            let child_at = at.tuple(pointer::join_index(&items_pointer, i), i);
            if let Some(mut child) = self.node_for(sub, &child_at, seed.and_then(|s| s.get(i)), None, false) {
                child.array_item = Some(ArrayItemType::Tuple);
                child.options.removable = removable && i >= sizing.min_items;
                node.items.push(child);
            }
        }

        let Some((item_schema, item_pointer)) = item else {
            return;
        };
        let item_data = pointer::join(&at.data, APPEND);
        let item_layout = pointer::join(&at.layout, APPEND);
        let key = self.generic(&item_data);
        let item_at = At {
            schema: item_pointer.clone(),
            data: item_data,
            layout: item_layout.clone(),
        };
        self.ensure_library(&key, item_schema, &item_at);

        // Recursive items only exist where there is data for them.
        let recursive_item = schema::placeholder_target(item_schema).is_some();
        for i in tuple.len()..tuple.len() + sizing.list_items {
            let value = seed
                .and_then(|s| s.get(i))
                .filter(|v| !(recursive_item && v.is_null()));
            let child = match value {
                Some(value) => self.node_for(item_schema, &at.list(item_pointer.clone(), i), Some(value), None, false),
                None if recursive_item => None,
                None => instantiate(&self.library, &key, &item_layout, &mut self.next_id),
            };
            match child {
                Some(mut child) => {
                    child.array_item = Some(ArrayItemType::List);
                    child.options.removable = removable;
                    node.items.push(child);
                }
                None => debug!("{}: no layout for item {i}", at.layout),
            }
        }

        if node.options.addable && sizing.max_items.is_none_or(|max| sizing.min_items < max) {
            let title = item_schema
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| node.options.title.clone())
                .unwrap_or_else(|| "Item".into());
            if let Some(add) = self.add_node(&item_layout, &item_pointer, key, format!("Add {title}")) {
                node.items.push(add);
            }
        }
    }

    /// Build `schema` into the library under `key` unless already there.
    fn ensure_library(&mut self, key: &str, schema: &'a Value, at: &At) {
        if self.library.contains_key(key) {
            return;
        }
        self.library.insert(key.to_string(), None);
        match self.node_for(schema, at, None, None, false) {
            Some(node) => {
                self.library.insert(key.to_string(), Some(node));
            }
            None => {
                self.library.shift_remove(key);
            }
        }
    }

    fn add_node(&mut self, layout: &str, schema_pointer: &str, key: String, title: String) -> Option<LayoutNode> {
        if !self.widget_ok(&WidgetKind::Ref) {
            return None;
        }
        let mut add = LayoutNode::new(self.next_id(), WidgetKind::Ref);
        add.data_pointer = Some(layout.to_string());
        add.schema_pointer = Some(schema_pointer.to_string());
        add.ref_pointer = Some(key);
        add.options.title = Some(title);
        add.handle = self.widgets.get_widget(&WidgetKind::Ref);
        Some(add)
    }

    /// A recursive `$ref`: expanded where data exists, an add button
    /// otherwise.
    fn ref_node(
        &mut self,
        target: &str,
        at: &At,
        seed: Option<&'a Value>,
        name: Option<&str>,
        required: bool,
    ) -> Option<LayoutNode> {
        let resolved = self.resolved;
        let key = format!("#{target}");
        let Some(target_schema) = resolved.subschema(target) else {
            self.diagnose(FormError::TemplateNotFound(key));
            return None;
        };
        if !self.library.contains_key(&key) {
            let raw_generic = pointer::to_generic(&at.data, &resolved.array_map);
            let target_data = resolved
                .recursive_refs
                .get(&raw_generic)
                .cloned()
                .unwrap_or_else(|| schema::schema_to_data_pointer(target));
            let target_at = At {
                schema: target.to_string(),
                data: target_data.clone(),
                layout: target_data,
            };
            self.ensure_library(&key, target_schema, &target_at);
        }

        match seed.filter(|v| !v.is_null()) {
            Some(value) => {
                let expanded_at = At {
                    schema: target.to_string(),
                    ..at.clone()
                };
                let mut node = self.node_for(target_schema, &expanded_at, Some(value), name, required)?;
                node.recursive_reference = true;
                node.ref_pointer = Some(key);
                Some(node)
            }
            None => {
                let title = name
                    .map(schema::humanize)
                    .or_else(|| target_schema.get("title").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "Item".into());
                let mut add = self.add_node(&at.layout, &at.schema, key, format!("Add {title}"))?;
                add.name = name.map(str::to_string);
                add.recursive_reference = true;
                add.options.required = required;
                Some(add)
            }
        }
    }

    fn user_items(&mut self, elements: &'a [Value], path: &str) -> Vec<LayoutNode> {
        let mut items = Vec::new();
        for (i, element) in elements.iter().enumerate() {
            items.extend(self.user_element(element, &pointer::join_index(path, i)));
        }
        items
    }

    fn user_element(&mut self, element: &'a Value, path: &str) -> Vec<LayoutNode> {
        match element {
            Value::String(key) if key == "*" => self.wildcard(),
            Value::String(key) => self.keyed(key, None, path).into_iter().collect(),
            Value::Object(map) => match map.get("key") {
                Some(Value::String(key)) => self.keyed(key, Some(map), path).into_iter().collect(),
                Some(other) => {
                    self.invalid(path, format!("key must be a string, got {other}"));
                    Vec::new()
                }
                None if ["type", "widget", "items"].iter().any(|k| map.contains_key(*k)) => {
                    self.container(map, path).into_iter().collect()
                }
                None => {
                    self.invalid(path, "element has neither a key nor a type".into());
                    Vec::new()
                }
            },
            other => {
                self.invalid(path, format!("unexpected element {other}"));
                Vec::new()
            }
        }
    }

    /// Synthesized root children not named elsewhere in the user layout.
    fn wildcard(&mut self) -> Vec<LayoutNode> {
        let resolved = self.resolved;
        if schema::primary_type(&resolved.schema) != Some(SchemaType::Object) {
            debug!("layout wildcard on a non-object root expands to nothing");
            return Vec::new();
        }
        let used = std::mem::take(&mut self.used_keys);
        let items = self
            .object_items(&resolved.schema, &At::default(), self.data)
            .into_iter()
            .filter(|node| node.data_pointer.as_ref().is_none_or(|p| !used.contains(p)))
            .collect();
        self.used_keys = used;
        items
    }

    fn keyed(&mut self, key: &str, overrides: Option<&'a Map<String, Value>>, path: &str) -> Option<LayoutNode> {
        let resolved = self.resolved;
        let data_pointer = key_pointer(key);
        let name = pointer::last_key(&data_pointer);
        let found = schema::data_to_schema_pointer(&data_pointer, &resolved.schema, &resolved.ref_library)
            .and_then(|sp| resolved.subschema(&sp).map(|s| (sp, s)));

        let mut node = match found {
            Some((schema_pointer, schema)) => {
                let concrete = !data_pointer.split('/').any(|k| k == APPEND);
                let seed = self
                    .data
                    .filter(|_| concrete)
                    .and_then(|d| pointer::get(d, &data_pointer));
                let required = self
                    .data_map
                    .get(&self.generic(&data_pointer))
                    .is_some_and(|e| e.required);
                let at = At {
                    schema: schema_pointer,
                    data: data_pointer.clone(),
                    layout: data_pointer.clone(),
                };
                self.node_for(schema, &at, seed, name.as_deref(), required)?
            }
            None => {
                let explicit = overrides
                    .and_then(|m| m.get("type").or_else(|| m.get("widget")))
                    .and_then(Value::as_str)
                    .map(WidgetKind::parse);
                let Some(widget) = explicit else {
                    self.invalid(path, format!("key {key:?} is not in the schema"));
                    return None;
                };
                warn!("layout key {key:?} is not in the schema, keeping its {widget} widget");
                if !self.widget_ok(&widget) {
                    return None;
                }
                let mut node = LayoutNode::new(self.next_id(), widget);
                node.name = name;
                node.data_pointer = Some(data_pointer);
                node.handle = self.widgets.get_widget(&node.widget);
                node
            }
        };
        if let Some(map) = overrides
            && !self.apply_overrides(&mut node, map, path)
        {
            return None;
        }
        Some(node)
    }

    /// A user element without a key: a section, tabs, help text...
    fn container(&mut self, map: &'a Map<String, Value>, path: &str) -> Option<LayoutNode> {
        let widget = match map.get("type").or_else(|| map.get("widget")) {
            Some(Value::String(name)) => WidgetKind::parse(name),
            Some(other) => {
                self.invalid(path, format!("widget type must be a string, got {other}"));
                return None;
            }
            None => WidgetKind::Section,
        };
        if !self.widget_ok(&widget) {
            return None;
        }
        let mut node = LayoutNode::new(self.next_id(), widget);
        node.handle = self.widgets.get_widget(&node.widget);
        self.apply_overrides(&mut node, map, path).then_some(node)
    }

    /// Overlay the keys of a user layout element onto `node`.
    ///
    /// Returns `false` when the element asks for an unknown widget.
    fn apply_overrides(&mut self, node: &mut LayoutNode, map: &'a Map<String, Value>, path: &str) -> bool {
        for (key, value) in map {
            match key.as_str() {
                "key" => {}
                "type" | "widget" => {
                    let Some(name) = value.as_str() else {
                        self.invalid(path, format!("widget type must be a string, got {value}"));
                        return false;
                    };
                    let widget = WidgetKind::parse(name);
                    if !self.widget_ok(&widget) {
                        return false;
                    }
                    if let Some(data_pointer) = &node.data_pointer {
                        let generic = self.generic(data_pointer);
                        if let Some(entry) = self.data_map.get_mut(&generic) {
                            entry.widget = Some(widget.clone());
                        }
                    }
                    node.handle = self.widgets.get_widget(&widget);
                    node.widget = widget;
                }
                "items" => match value.as_array() {
                    Some(items) => node.items = self.user_items(items, &pointer::join(path, "items")),
                    None => self.invalid(path, "items must be an array".into()),
                },
                "title" => node.options.title = value.as_str().map(str::to_string),
                "description" => node.options.description = value.as_str().map(str::to_string),
                "required" => node.options.required = value.as_bool().unwrap_or(node.options.required),
                "readonly" | "readOnly" => {
                    node.options.read_only = value.as_bool().unwrap_or(node.options.read_only);
                }
                "addable" => node.options.addable = value.as_bool().unwrap_or(node.options.addable),
                "orderable" => node.options.orderable = value.as_bool().unwrap_or(node.options.orderable),
                "removable" => node.options.removable = value.as_bool().unwrap_or(node.options.removable),
                "default" => {
                    node.options.default = Some(value.clone());
                    if let Some(data_pointer) = node.data_pointer.clone() {
                        self.apply_layout_default(&data_pointer, value);
                    }
                }
                _ => {
                    node.options.extra.insert(key.clone(), value.clone());
                }
            }
        }
        true
    }

    /// Seed the template leaf at `data_pointer` with a layout default.
    ///
    /// Caller data always wins; list item positions are left alone since
    /// their templates are shared.
    fn apply_layout_default(&mut self, data_pointer: &str, value: &Value) {
        if !self.layout_defaults || self.data.is_some_and(|d| pointer::has(d, data_pointer)) {
            return;
        }
        let generic = self.generic(data_pointer);
        if generic != data_pointer {
            debug!("layout default at {data_pointer} is not applied to the shared template");
            return;
        }
        let Some(template_pointer) = self
            .data_map
            .get(&generic)
            .and_then(|e| e.template_pointer.clone())
        else {
            return;
        };
        if let Some(template) = self.template.as_deref_mut()
            && let Some(ControlTemplate::Leaf(leaf)) = template.get_mut(&template_pointer)
        {
            debug!("layout default for {data_pointer}: {value}");
            leaf.value = value.clone();
        }
    }
}

/// Data pointer named by a user layout key (`a.b[0]` or `/a/b/0`).
fn key_pointer(key: &str) -> String {
    pointer::compile(&pointer::parse_object_path(key))
}

fn collect_keys(elements: &[Value], keys: &mut Vec<String>) {
    for element in elements {
        match element {
            Value::String(key) if key != "*" => keys.push(key_pointer(key)),
            Value::Object(map) => {
                if let Some(key) = map.get("key").and_then(Value::as_str) {
                    keys.push(key_pointer(key));
                }
                if let Some(items) = map.get("items").and_then(Value::as_array) {
                    collect_keys(items, keys);
                }
            }
            _ => {}
        }
    }
}

fn contains_widget(node: &LayoutNode, kind: &WidgetKind) -> bool {
    node.widget == *kind || node.items.iter().any(|item| contains_widget(item, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::BuiltinWidgets,
        schema::resolve,
        template::build::build_template,
    };
    use serde_json::json;

    struct Built {
        layout: LayoutOutput,
        data_map: DataMap,
        template: Option<ControlTemplate>,
    }

    fn build(schema: Value, layout: Option<Value>, data: Option<Value>, options: &FormOptions) -> Built {
        let resolved = resolve(&schema);
        let mut data_map = DataMap::new();
        let mut template = build_template(&resolved, options, data.as_ref(), &mut data_map).root;
        let widgets = BuiltinWidgets::new();
        let elements = layout.as_ref().and_then(Value::as_array).map(Vec::as_slice);
        let input = LayoutInput {
            resolved: &resolved,
            options,
            user_layout: elements,
            data: data.as_ref(),
            widgets: &widgets,
        };
        let layout = build_layout(input, &mut data_map, template.as_mut());
        Built {
            layout,
            data_map,
            template,
        }
    }

    fn titles(node: &LayoutNode) -> Vec<String> {
        node.items
            .iter()
            .map(|n| n.options.title.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_schema_layout() {
        let schema = json!({
            "type": "object",
            "title": "Person",
            "required": ["firstName"],
            "properties": {
                "firstName": {"type": "string", "maxLength": 20},
                "age": {"type": "integer", "title": "Age in years"},
                "color": {"type": "string", "enum": ["red", "green"]}
            }
        });
        let built = build(schema, None, None, &FormOptions::default());
        let root = &built.layout.root;
        assert_eq!(root.widget, WidgetKind::Section);
        assert_eq!(root.options.title.as_deref(), Some("Person"));
        assert_eq!(titles(root), vec!["First Name", "Age in years", "Color"]);

        let first = &root.items[0];
        assert_eq!(first.data_pointer.as_deref(), Some("/firstName"));
        assert!(first.options.required);
        assert_eq!(first.options.validators.keywords(), vec!["required", "type", "maxLength"]);
        assert_eq!(root.items[2].widget, WidgetKind::Select);
        assert_eq!(root.items[2].options.title_map.len(), 2);
        assert!(first.handle.is_some());
        assert_eq!(built.data_map.get("/age").unwrap().widget, Some(WidgetKind::Integer));
        assert!(built.layout.diagnostics.is_empty());
    }

    #[test]
    fn test_array_items_and_add_button() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "fixed": {"type": "array", "items": {"type": "string"}, "minItems": 2, "maxItems": 2}
            }
        });
        let built = build(schema, None, Some(json!({"tags": ["a", "b"]})), &FormOptions::default());
        let tags = &built.layout.root.items[0];
        assert_eq!(tags.widget, WidgetKind::Array);
        assert_eq!(tags.array_item_count(), 2);
        let add = tags.items.last().unwrap();
        assert!(add.is_add_button());
        assert_eq!(add.ref_pointer.as_deref(), Some("/tags/-"));
        assert_eq!(tags.items[1].data_pointer.as_deref(), Some("/tags/-"));
        assert!(built.layout.library.contains_key("/tags/-"));

        let fixed = &built.layout.root.items[1];
        assert_eq!(fixed.array_item_count(), 2);
        assert!(!fixed.items.iter().any(LayoutNode::is_add_button));

        let mut ids: Vec<&str> = Vec::new();
        fn walk<'n>(node: &'n LayoutNode, ids: &mut Vec<&'n str>) {
            ids.push(&node.id);
            node.items.iter().for_each(|n| walk(n, ids));
        }
        walk(&built.layout.root, &mut ids);
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }

    #[test]
    fn test_combinators() {
        let schema = json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}, "a": {"type": "string"}}},
                {"title": "B", "properties": {"kind": {"const": "b"}, "b": {"type": "integer"}}}
            ],
            "if": {"properties": {"kind": {"const": "a"}}},
            "then": {"properties": {"extra": {"type": "string"}}},
            "else": {"properties": {"other": {"type": "string"}}}
        });
        let built = build(schema, None, Some(json!({"kind": "b"})), &FormOptions::default());
        let root = &built.layout.root;
        let selector = root.items.iter().find(|n| n.widget == WidgetKind::OneOf).unwrap();
        assert_eq!(selector.options.selected_branch, Some(1));
        assert_eq!(titles(selector), vec!["Option 1", "B"]);
        assert!(selector.items.iter().all(|t| t.widget == WidgetKind::Tab));

        let extra = root.items.iter().find(|n| n.name.as_deref() == Some("extra")).unwrap();
        let condition = extra.options.condition.as_ref().unwrap();
        assert_eq!(condition.if_pointer, "/if");
        assert!(!condition.negate);
        let other = root.items.iter().find(|n| n.name.as_deref() == Some("other")).unwrap();
        assert!(other.options.condition.as_ref().unwrap().negate);
        assert_eq!(other.options.conditional_group, Some(CombinatorKind::IfThenElse));
    }

    #[test]
    fn test_recursive_reference() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "child": {"$ref": "#"}}
        });
        let empty = build(schema.clone(), None, None, &FormOptions::default());
        let child = &empty.layout.root.items[1];
        assert!(child.is_add_button());
        assert!(child.recursive_reference);
        assert_eq!(child.ref_pointer.as_deref(), Some("#"));
        assert!(matches!(empty.layout.library.get("#"), Some(Some(_))));

        let data = json!({"name": "a", "child": {"name": "b"}});
        let seeded = build(schema, None, Some(data), &FormOptions::default());
        let child = &seeded.layout.root.items[1];
        assert_eq!(child.widget, WidgetKind::Section);
        assert!(child.recursive_reference);
        assert_eq!(child.items[0].data_pointer.as_deref(), Some("/child/name"));
        assert!(child.items[1].is_add_button());
        assert_eq!(child.items[1].data_pointer.as_deref(), Some("/child/child"));
    }

    #[test]
    fn test_instantiate_rebases() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "child": {"$ref": "#"}}
        });
        let built = build(schema, None, None, &FormOptions::default());
        let mut counter = built.layout.next_id;
        let node = instantiate(&built.layout.library, "#", "/child", &mut counter).unwrap();
        assert_eq!(node.data_pointer.as_deref(), Some("/child"));
        assert_eq!(node.items[0].data_pointer.as_deref(), Some("/child/name"));
        assert!(counter > built.layout.next_id);
        assert_eq!(instantiate(&built.layout.library, "#/nope", "", &mut counter), None);
    }

    #[test]
    fn test_user_layout() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "email": {"type": "string", "format": "email"}
            }
        });
        let layout = json!([
            {"key": "age", "title": "Years", "htmlClass": "narrow", "default": 30},
            {"type": "help", "helpvalue": "<p>hi</p>"},
            "missing",
            {"key": "name", "type": "map"},
            {"type": "fieldset", "items": ["*"]},
            42
        ]);
        let options = FormOptions {
            add_submit: Policy::Auto,
            ..FormOptions::default()
        };
        let built = build(schema, Some(layout), None, &options);
        let root = &built.layout.root;
        let widgets: Vec<&WidgetKind> = root.items.iter().map(|n| &n.widget).collect();
        assert_eq!(
            widgets,
            vec![&WidgetKind::Integer, &WidgetKind::Help, &WidgetKind::Fieldset, &WidgetKind::Submit]
        );
        let age = &root.items[0];
        assert_eq!(age.options.title.as_deref(), Some("Years"));
        assert_eq!(age.options.extra["htmlClass"], json!("narrow"));

        // "*" skips keys named elsewhere, even unknown-widget ones.
        let fieldset = &root.items[2];
        let names: Vec<_> = fieldset.items.iter().filter_map(|n| n.name.as_deref()).collect();
        assert_eq!(names, vec!["email"]);

        assert_eq!(built.layout.diagnostics.len(), 3);
        assert!(matches!(&built.layout.diagnostics[1], FormError::UnknownWidget(w) if w == "map"));

        let template = built.template.unwrap();
        let Some(ControlTemplate::Leaf(leaf)) = template.get("/controls/age") else {
            panic!("age is not a leaf");
        };
        assert_eq!(leaf.value, json!(30));
    }
}
