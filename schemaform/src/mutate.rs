//! Structural changes to a live form.
//!
//! Adding, removing and moving array items (and expanding or collapsing
//! recursive references) touches the control tree and the layout tree
//! together. Everything that can fail is prepared first: the layout clone is
//! built and the control subtree materialized before either is attached, and
//! a prepared control is freed again if the layout side cannot be committed.
//!
//! Layout data pointers are generic, so removing or moving an item never
//! requires rewriting the pointers of its siblings.

use serde_json::Value;

use crate::{
    control::{ControlKind, ControlTree, Materializer, NodeId},
    data::{DataMap, data_map::generic_pointer},
    layout::{
        ArrayItemType, LayoutNode, LayoutRefLibrary, WidgetKind, WidgetRegistry,
        build::{instantiate, next_node_id},
    },
    pointer::{self, APPEND},
    schema::{self, ResolvedSchema},
    template::{ControlTemplate, TemplateRefLibrary},
};

/// Everything a structural change reads or writes.
pub struct Mutator<'a> {
    pub tree: &'a mut ControlTree,
    pub layout: &'a mut LayoutNode,
    pub next_layout_id: &'a mut u64,
    pub layout_library: &'a LayoutRefLibrary,
    pub template_library: &'a TemplateRefLibrary,
    pub resolved: &'a ResolvedSchema,
    pub data_map: &'a DataMap,
    pub widgets: &'a dyn WidgetRegistry,
}

impl Mutator<'_> {
    fn generic(&self, indexed: &str) -> String {
        generic_pointer(indexed, &self.resolved.recursive_refs, &self.resolved.array_map)
    }

    /// Library key of the recursive reference at `member`, if there is one.
    fn recursive_key(&self, member: &str) -> Option<String> {
        let raw = pointer::to_generic(member, &self.resolved.array_map);
        [self.generic(member), raw]
            .iter()
            .find_map(|g| self.data_map.get(g)?.recursive_ref.clone())
    }

    fn list_layout_path(&self, list: &str) -> Option<Vec<usize>> {
        self.layout.find_path(list, |n| n.options.array.is_some())
    }

    /// Append a new item to the list at `target`, or expand the recursive
    /// member `key` of the group at `target`.
    pub fn add_item(&mut self, target: &str, key: Option<&str>) -> bool {
        let Some(id) = self.tree.get(target) else {
            warn!("add_item: no control at {target}");
            return false;
        };
        match (self.tree.node(id).map(|n| &n.kind), key) {
            (Some(ControlKind::List(_)), _) => self.add_list_item(id, target),
            (Some(ControlKind::Group(_)), Some(key)) => self.add_member(id, target, key),
            _ => {
                warn!("add_item: {target} is neither a list nor a group with a member key");
                false
            }
        }
    }

    fn add_list_item(&mut self, list: NodeId, target: &str) -> bool {
        let len = self.tree.list_len(list).unwrap_or(0);
        let sizing = self.data_map.get(&self.generic(target)).and_then(|e| e.array);
        if sizing.is_some_and(|s| !s.can_add(len)) {
            info!("add_item: {target} is full");
            return false;
        }
        let item_key = self.generic(&pointer::join(target, APPEND));
        let template_library = self.template_library;
        let Some(Some(template)) = template_library.get(&item_key) else {
            warn!("add_item: {target} has no item template");
            return false;
        };
        // Items that are a recursive reference expand from the library
        // even though there is no data for them yet.
        let item_ref = match template {
            ControlTemplate::Ref(reference) => Some(reference.pointer.clone()),
            _ => None,
        };
        let layout_key = item_ref.as_deref().unwrap_or(&item_key);

        let layout_path = self.list_layout_path(target);
        let layout_item = match &layout_path {
            Some(path) => {
                let Some(list_node) = self.layout.node_at(path) else {
                    return false;
                };
                let item_pointer = pointer::join(list_node.data_pointer.as_deref().unwrap_or_default(), APPEND);
                let removable = list_node.options.removable;
                let Some(mut item) = instantiate(self.layout_library, layout_key, &item_pointer, self.next_layout_id)
                else {
                    warn!("add_item: no layout for {layout_key}");
                    return false;
                };
                item.array_item = Some(ArrayItemType::List);
                item.options.removable = removable;
                if item_ref.is_some() {
                    item.recursive_reference = true;
                    item.ref_pointer = item_ref.clone();
                }
                Some(item)
            }
            None => {
                debug!("add_item: {target} has no layout node");
                None
            }
        };

        let child = {
            let mut materializer = Materializer {
                tree: &mut *self.tree,
                library: template_library,
                resolved: self.resolved,
                data_map: self.data_map,
            };
            match &item_ref {
                Some(key) => materializer.expand_ref(key, Some(list), None),
                None => materializer.materialize(template, Some(list), None),
            }
        };
        let Some(child) = child else {
            warn!("add_item: {item_key} produced no control");
            return false;
        };

        if let (Some(path), Some(item)) = (layout_path, layout_item) {
            let Some(list_node) = self.layout.node_at_mut(&path) else {
                self.tree.free_subtree(child);
                return false;
            };
            let at = list_node
                .items
                .iter()
                .position(LayoutNode::is_add_button)
                .unwrap_or(list_node.items.len());
            list_node.items.insert(at, item);
        }
        self.tree.push_list_child(list, child);
        self.tree.refresh_upward(child);
        debug!("add_item: {target} now has {} items", len + 1);
        true
    }

    fn add_member(&mut self, group: NodeId, target: &str, key: &str) -> bool {
        let member = pointer::join(target, key);
        if self.tree.get(&member).is_some() {
            info!("add_item: {member} already exists");
            return false;
        }
        let add_path = self
            .layout
            .find_path(&member, |n| n.is_add_button() && n.recursive_reference);
        let library_key = self
            .recursive_key(&member)
            .or_else(|| {
                let path = add_path.as_ref()?;
                self.layout.node_at(path)?.ref_pointer.clone()
            });
        let Some(library_key) = library_key else {
            warn!("add_item: {member} is not a recursive reference");
            return false;
        };

        let layout_item = match &add_path {
            Some(path) => {
                let Some(add) = self.layout.node_at(path) else {
                    return false;
                };
                let name = add.name.clone();
                let required = add.options.required;
                let at = add.data_pointer.clone().unwrap_or_default();
                let Some(mut node) = instantiate(self.layout_library, &library_key, &at, self.next_layout_id) else {
                    warn!("add_item: no layout for {library_key}");
                    return false;
                };
                node.name = name;
                node.options.required = required;
                node.recursive_reference = true;
                node.ref_pointer = Some(library_key.clone());
                Some(node)
            }
            None => None,
        };

        let child = {
            let mut materializer = Materializer {
                tree: &mut *self.tree,
                library: self.template_library,
                resolved: self.resolved,
                data_map: self.data_map,
            };
            materializer.expand_ref(&library_key, Some(group), None)
        };
        let Some(child) = child else {
            return false;
        };

        if let (Some(path), Some(node)) = (add_path, layout_item) {
            match self.layout.node_at_mut(&path) {
                Some(slot) => *slot = node,
                None => {
                    self.tree.free_subtree(child);
                    return false;
                }
            }
        }
        self.tree.insert_group_child(group, key, child);
        self.tree.refresh_upward(child);
        true
    }

    /// Remove the list item or group member at `target`.
    pub fn remove_item(&mut self, target: &str) -> bool {
        let (Some(parent), Some(key)) = (pointer::parent(target), pointer::last_key(target)) else {
            warn!("remove_item: the root cannot be removed");
            return false;
        };
        let Some(parent_id) = self.tree.get(&parent) else {
            warn!("remove_item: no control at {parent}");
            return false;
        };
        match self.tree.node(parent_id).map(|n| &n.kind) {
            Some(ControlKind::List(_)) => match key.parse::<usize>() {
                Ok(index) => self.remove_list_item(parent_id, &parent, index),
                Err(_) => {
                    warn!("remove_item: {key:?} is not an index");
                    false
                }
            },
            Some(ControlKind::Group(_)) => self.remove_member(parent_id, target, &key),
            _ => {
                warn!("remove_item: {parent} holds no items");
                false
            }
        }
    }

    fn remove_list_item(&mut self, list: NodeId, target: &str, index: usize) -> bool {
        let len = self.tree.list_len(list).unwrap_or(0);
        if index >= len {
            warn!("remove_item: {target} has no item {index}");
            return false;
        }
        let sizing = self.data_map.get(&self.generic(target)).and_then(|e| e.array);
        if sizing.is_some_and(|s| !s.can_remove(len)) {
            info!("remove_item: {target} is at its minimum size");
            return false;
        }
        let layout_item = match self.list_layout_path(target) {
            Some(path) => match self.layout.node_at(&path).and_then(|n| item_position(n, index)) {
                Some(at) => Some((path, at)),
                None => {
                    warn!("remove_item: layout of {target} has no item {index}");
                    return false;
                }
            },
            None => None,
        };

        if let Some((path, at)) = layout_item
            && let Some(list_node) = self.layout.node_at_mut(&path)
        {
            list_node.items.remove(at);
        }
        self.tree.remove_list_child(list, index);
        self.tree.refresh_upward(list);
        true
    }

    fn remove_member(&mut self, group: NodeId, target: &str, key: &str) -> bool {
        if self.tree.get(target).is_none() {
            warn!("remove_item: no control at {target}");
            return false;
        }
        let recursive = self.recursive_key(target);
        let path = self
            .layout
            .find_path(target, |n| !n.is_add_button() && n.name.as_deref() == Some(key));
        if let Some(path) = path
            && let Some((last, parent_path)) = path.split_last()
        {
            match recursive {
                Some(library_key) => {
                    let add = self.add_button(&path, library_key, key);
                    if let (Some(add), Some(slot)) = (add, self.layout.node_at_mut(&path)) {
                        *slot = add;
                    }
                }
                None => {
                    if let Some(parent) = self.layout.node_at_mut(parent_path) {
                        parent.items.remove(*last);
                    }
                }
            }
        }
        self.tree.remove_group_child(group, key);
        self.tree.refresh_upward(group);
        true
    }

    /// The add node an expanded recursive member reverts to.
    fn add_button(&mut self, path: &[usize], library_key: String, key: &str) -> Option<LayoutNode> {
        let expanded = self.layout.node_at(path)?;
        let mut add = LayoutNode::new(next_node_id(self.next_layout_id), WidgetKind::Ref);
        add.name = expanded.name.clone();
        add.data_pointer = expanded.data_pointer.clone();
        add.schema_pointer = expanded.schema_pointer.clone();
        add.options.required = expanded.options.required;
        add.options.title = Some(format!("Add {}", schema::humanize(key)));
        add.ref_pointer = Some(library_key);
        add.recursive_reference = true;
        add.handle = self.widgets.get_widget(&WidgetKind::Ref);
        Some(add)
    }

    /// Move the item at `from` of the list at `target` to `to`.
    pub fn move_array_item(&mut self, target: &str, from: usize, to: usize, move_layout: bool) -> bool {
        let Some(list) = self.tree.get(target) else {
            warn!("move_array_item: no control at {target}");
            return false;
        };
        let len = self.tree.list_len(list).unwrap_or(0);
        if from >= len || to >= len {
            warn!("move_array_item: cannot move {target} item {from} to {to}");
            return false;
        }
        let layout_move = match self.list_layout_path(target).filter(|_| move_layout) {
            Some(path) => {
                let positions = self
                    .layout
                    .node_at(&path)
                    .map(|n| (item_position(n, from), item_position(n, to)));
                match positions {
                    Some((Some(a), Some(b))) => Some((path, a, b)),
                    _ => {
                        warn!("move_array_item: layout of {target} has no items {from} and {to}");
                        return false;
                    }
                }
            }
            None => None,
        };

        if let Some((path, a, b)) = layout_move
            && let Some(list_node) = self.layout.node_at_mut(&path)
        {
            let item = list_node.items.remove(a);
            list_node.items.insert(b, item);
        }
        self.tree.move_list_child(list, from, to);
        self.tree.refresh_upward(list);
        true
    }
}

/// Position among `node.items` of the `index`-th array item.
fn item_position(node: &LayoutNode, index: usize) -> Option<usize> {
    node.items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.array_item.is_some())
        .nth(index)
        .map(|(i, _)| i)
}

/// Value stored for a control after a structural change.
pub fn value_at(tree: &ControlTree, pointer: &str) -> Value {
    tree.get(pointer).map_or(Value::Null, |id| tree.value(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{FormCompilationContext, FormInput},
        layout::BuiltinWidgets,
        options::FormOptions,
    };
    use serde_json::json;

    struct Fixture {
        ctx: FormCompilationContext,
        tree: ControlTree,
        widgets: BuiltinWidgets,
    }

    impl Fixture {
        fn new(schema: Value, data: Value) -> Self {
            let widgets = BuiltinWidgets::new();
            let ctx = FormCompilationContext::compile(
                FormInput::new(schema).with_data(data),
                FormOptions::default(),
                &widgets,
            )
            .unwrap();
            let tree = ControlTree::from_context(&ctx);
            Self { ctx, tree, widgets }
        }

        fn mutator(&mut self) -> Mutator<'_> {
            Mutator {
                tree: &mut self.tree,
                layout: &mut self.ctx.layout,
                next_layout_id: &mut self.ctx.next_layout_id,
                layout_library: &self.ctx.layout_library,
                template_library: &self.ctx.template_library,
                resolved: &self.ctx.resolved,
                data_map: &self.ctx.data_map,
                widgets: &self.widgets,
            }
        }

        fn list_layout(&self, pointer: &str) -> &LayoutNode {
            let path = self.ctx.layout.find_path(pointer, |n| n.options.array.is_some()).unwrap();
            self.ctx.layout.node_at(&path).unwrap()
        }
    }

    fn tags_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 3, "minItems": 1}
            }
        })
    }

    #[test]
    fn test_add_list_item() {
        let mut f = Fixture::new(tags_schema(), json!({"tags": ["a", "b"]}));
        assert!(f.mutator().add_item("/tags", None));
        assert_eq!(value_at(&f.tree, "/tags"), json!(["a", "b", null]));
        let list = f.list_layout("/tags");
        assert_eq!(list.array_item_count(), 3);
        assert!(list.items.last().unwrap().is_add_button());

        assert!(!f.mutator().add_item("/tags", None));
        assert!(!f.mutator().add_item("/missing", None));
    }

    #[test]
    fn test_remove_and_move() {
        let mut f = Fixture::new(tags_schema(), json!({"tags": ["a", "b", "c"]}));
        let first_layout = f.list_layout("/tags").items[0].id.clone();
        assert!(f.mutator().move_array_item("/tags", 0, 2, true));
        assert_eq!(value_at(&f.tree, "/tags"), json!(["b", "c", "a"]));
        assert_eq!(f.list_layout("/tags").items[2].id, first_layout);
        assert!(!f.mutator().move_array_item("/tags", 0, 7, true));

        assert!(f.mutator().remove_item("/tags/0"));
        assert!(f.mutator().remove_item("/tags/0"));
        assert_eq!(value_at(&f.tree, "/tags"), json!(["a"]));
        assert_eq!(f.list_layout("/tags").array_item_count(), 1);
        assert!(!f.mutator().remove_item("/tags/0"));
        assert!(!f.mutator().remove_item("/tags/4"));
    }

    #[test]
    fn test_missing_layout_item_leaves_tree_alone() {
        let mut f = Fixture::new(tags_schema(), json!({"tags": ["a", "b", "c"]}));
        let path = f.ctx.layout.find_path("/tags", |n| n.options.array.is_some()).unwrap();
        let list = f.ctx.layout.node_at_mut(&path).unwrap();
        let second = item_position(list, 1).unwrap();
        list.items.remove(second);

        assert!(!f.mutator().remove_item("/tags/2"));
        assert!(!f.mutator().move_array_item("/tags", 2, 0, true));
        assert_eq!(value_at(&f.tree, "/tags"), json!(["a", "b", "c"]));
        assert_eq!(f.list_layout("/tags").array_item_count(), 2);

        assert!(f.mutator().move_array_item("/tags", 0, 1, false));
        assert_eq!(value_at(&f.tree, "/tags"), json!(["b", "a", "c"]));
    }

    #[test]
    fn test_add_remove_cycles_reuse_slots() {
        let mut f = Fixture::new(tags_schema(), json!({"tags": ["a"]}));
        assert!(f.mutator().add_item("/tags", None));
        assert!(f.mutator().remove_item("/tags/1"));
        let capacity = f.tree.capacity();
        for _ in 0..100 {
            assert!(f.mutator().add_item("/tags", None));
            assert!(f.mutator().remove_item("/tags/1"));
        }
        assert_eq!(f.tree.capacity(), capacity);
        assert_eq!(value_at(&f.tree, "/tags"), json!(["a"]));
    }

    #[test]
    fn test_recursive_list_items() {
        let schema = json!({
            "definitions": {
                "node": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/definitions/node"}}
                    }
                }
            },
            "$ref": "#/definitions/node"
        });
        let mut f = Fixture::new(schema, json!({"name": "root"}));
        assert!(f.tree.get("/children").is_some());
        assert_eq!(f.list_layout("/children").array_item_count(), 0);

        assert!(f.mutator().add_item("/children", None));
        assert!(f.tree.get("/children/0/name").is_some());
        assert!(f.tree.get("/children/0/children").is_some());
        assert_eq!(f.list_layout("/children").array_item_count(), 1);

        assert!(f.mutator().add_item("/children/0/children", None));
        assert!(f.tree.get("/children/0/children/0/name").is_some());
        assert!(f.mutator().remove_item("/children/0"));
        assert!(f.tree.get("/children/0").is_none());
        assert_eq!(value_at(&f.tree, "/children"), json!([]));
        assert_eq!(f.list_layout("/children").array_item_count(), 0);
    }

    #[test]
    fn test_recursive_member() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "child": {"$ref": "#"}}
        });
        let mut f = Fixture::new(schema, json!({"name": "a"}));
        assert!(f.tree.get("/child").is_none());
        assert!(f.mutator().add_item("", Some("child")));
        assert!(f.tree.get("/child/name").is_some());
        let child = f.ctx.layout.find_path("/child", |n| n.name.as_deref() == Some("child")).unwrap();
        let node = f.ctx.layout.node_at(&child).unwrap();
        assert!(!node.is_add_button());
        assert_eq!(node.items[0].data_pointer.as_deref(), Some("/child/name"));

        assert!(f.mutator().add_item("/child", Some("child")));
        assert!(f.tree.get("/child/child/name").is_some());
        assert!(!f.mutator().add_item("", Some("child")));

        assert!(f.mutator().remove_item("/child"));
        assert!(f.tree.get("/child").is_none());
        let node = f.ctx.layout.node_at(&child).unwrap();
        assert!(node.is_add_button());
        assert_eq!(value_at(&f.tree, ""), json!({"name": "a"}));
    }
}
