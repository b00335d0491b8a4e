//! The live control tree.
//!
//! Controls live in an arena and refer to each other by [`NodeId`]. Slots of
//! removed nodes are reused under a new generation, so ids handed out earlier
//! never point at a different control.
//!
//! Every control keeps its own validity. Changing a leaf revalidates it and
//! then each ancestor, emitting on the status channel of every control whose
//! status actually changed.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    data::FormCompilationContext,
    notify::Channel,
    pointer,
    template::{Failure, ValidatorSet},
};

/// Building controls from templates.
pub mod materialize;

pub use materialize::Materializer;

/// Arena slot and generation of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlStatus {
    Valid,
    Invalid,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Group(IndexMap<String, NodeId>),
    List(Vec<NodeId>),
    Leaf(Value),
}

#[derive(Debug)]
pub struct ControlNode {
    pub parent: Option<NodeId>,
    pub kind: ControlKind,
    pub validators: ValidatorSet,
    pub disabled: bool,
    /// Set once the user (or the host) changed the value.
    pub dirty: bool,
    pub status: ControlStatus,
    /// Why the control's own validators failed, if they did.
    pub failure: Option<Failure>,
    pub value_changes: Channel<Value>,
    pub status_changes: Channel<ControlStatus>,
}

/// Arena of controls plus the aliases of combinator branch keys.
#[derive(Debug, Default)]
pub struct ControlTree {
    slots: Vec<Slot>,
    /// Indices of vacant slots.
    free: Vec<usize>,
    root: Option<NodeId>,
    /// Branch schema pointer (the first segment of a branch root pointer) →
    /// data pointer of the level it applies to.
    aliases: IndexMap<String, String>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<ControlNode>,
}

impl ControlTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize and validate the control tree of a compiled form.
    pub fn from_context(ctx: &FormCompilationContext) -> Self {
        let mut tree = ControlTree::new();
        if let Some(template) = &ctx.template {
            let mut materializer = Materializer {
                tree: &mut tree,
                library: &ctx.template_library,
                resolved: &ctx.resolved,
                data_map: &ctx.data_map,
            };
            materializer.materialize_root(template, ctx.data.as_ref());
        }
        tree.validate_all();
        debug!("control tree: {} controls", tree.len());
        tree
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub fn node(&self, id: NodeId) -> Option<&ControlNode> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ControlNode> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Number of live controls.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of arena slots, live or vacant.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a detached control.
    pub fn alloc(&mut self, parent: Option<NodeId>, kind: ControlKind, validators: ValidatorSet, disabled: bool) -> NodeId {
        let node = ControlNode {
            parent,
            kind,
            validators,
            disabled,
            dirty: false,
            status: if disabled { ControlStatus::Disabled } else { ControlStatus::Valid },
            failure: None,
            value_changes: Channel::new(),
            status_changes: Channel::new(),
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.node = Some(node);
        NodeId {
            index,
            generation: slot.generation,
        }
    }

    /// Drop a control and everything below it.
    pub fn free_subtree(&mut self, id: NodeId) {
        let Some(slot) = self.slots.get_mut(id.index).filter(|s| s.generation == id.generation) else {
            return;
        };
        let Some(node) = slot.node.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        for child in children_of(&node.kind) {
            self.free_subtree(child);
        }
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map(|n| children_of(&n.kind)).unwrap_or_default()
    }

    /// Register `root_key` as another name for the control at `data_pointer`.
    pub fn add_alias(&mut self, root_key: String, data_pointer: String) {
        self.aliases.entry(root_key).or_insert(data_pointer);
    }

    /// Current value of a control (`null` for unknown ids).
    pub fn value(&self, id: NodeId) -> Value {
        let Some(node) = self.node(id) else {
            return Value::Null;
        };
        match &node.kind {
            ControlKind::Leaf(value) => value.clone(),
            ControlKind::Group(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), self.value(*child)))
                    .collect::<Map<String, Value>>(),
            ),
            ControlKind::List(children) => Value::Array(children.iter().map(|c| self.value(*c)).collect()),
        }
    }

    /// Control at an indexed data pointer.
    ///
    /// The first segment may be a combinator branch key, standing for the
    /// data level that branch applies to.
    pub fn get(&self, data_pointer: &str) -> Option<NodeId> {
        let keys = pointer::parse(data_pointer).ok()?;
        if let Some((first, rest)) = keys.split_first()
            && let Some(target) = self.aliases.get(first)
        {
            return self.get(&format!("{target}{}", pointer::compile(rest)));
        }
        keys.iter().try_fold(self.root?, |id, key| match &self.node(id)?.kind {
            ControlKind::Group(children) => children.get(key).copied(),
            ControlKind::List(children) => children.get(key.parse::<usize>().ok()?).copied(),
            ControlKind::Leaf(_) => None,
        })
    }

    /// Indexed data pointer of a control.
    pub fn pointer_of(&self, id: NodeId) -> Option<String> {
        let mut keys = Vec::new();
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            let key = match &self.node(parent)?.kind {
                ControlKind::Group(children) => children.iter().find(|(_, c)| **c == current)?.0.clone(),
                ControlKind::List(children) => children.iter().position(|c| *c == current)?.to_string(),
                ControlKind::Leaf(_) => return None,
            };
            keys.push(key);
            current = parent;
        }
        (Some(current) == self.root).then(|| {
            keys.reverse();
            pointer::compile(&keys)
        })
    }

    /// Replace the value of a control.
    ///
    /// Leaves take the value as is; groups and lists hand each child its
    /// part (`null` where missing). The control and its ancestors are
    /// revalidated, and value subscribers of the control and of every
    /// ancestor are notified. Returns `false` for unknown ids.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        self.assign(id, &value);
        self.refresh_subtree(id);
        let mut current = Some(id);
        while let Some(cid) = current {
            self.refresh_status(cid);
            let wants_value = self.node(cid).is_some_and(|n| !n.value_changes.is_empty());
            if wants_value {
                let value = self.value(cid);
                if let Some(node) = self.node_mut(cid) {
                    node.value_changes.emit(&value);
                }
            }
            current = self.node(cid).and_then(|n| n.parent);
        }
        true
    }

    fn assign(&mut self, id: NodeId, value: &Value) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.dirty = true;
        match &mut node.kind {
            ControlKind::Leaf(current) => *current = value.clone(),
            ControlKind::Group(children) => {
                let parts: Vec<(NodeId, Value)> = children
                    .iter()
                    .map(|(key, child)| (*child, value.get(key).cloned().unwrap_or(Value::Null)))
                    .collect();
                for (child, part) in parts {
                    self.assign(child, &part);
                }
            }
            ControlKind::List(children) => {
                let parts: Vec<(NodeId, Value)> = children
                    .iter()
                    .enumerate()
                    .map(|(i, child)| (*child, value.get(i).cloned().unwrap_or(Value::Null)))
                    .collect();
                for (child, part) in parts {
                    self.assign(child, &part);
                }
            }
        }
    }

    /// Recompute the status of one control from its children and its own
    /// validators. Emits on its status channel when the status changed.
    pub fn refresh_status(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let (status, failure) = if node.disabled {
            (ControlStatus::Disabled, None)
        } else if children_of(&node.kind)
            .iter()
            .any(|c| self.node(*c).is_some_and(|n| n.status == ControlStatus::Invalid))
        {
            (ControlStatus::Invalid, None)
        } else {
            match node.validators.validate(&self.value(id)) {
                Ok(()) => (ControlStatus::Valid, None),
                Err(failure) => (ControlStatus::Invalid, Some(failure)),
            }
        };
        if let Some(node) = self.node_mut(id) {
            node.failure = failure;
            if node.status != status {
                node.status = status;
                node.status_changes.emit(&status);
            }
        }
    }

    fn refresh_subtree(&mut self, id: NodeId) {
        for child in self.children(id) {
            self.refresh_subtree(child);
        }
        self.refresh_status(id);
    }

    /// Revalidate a control and every ancestor, bottom up.
    pub fn refresh_upward(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(cid) = current {
            self.refresh_status(cid);
            current = self.node(cid).and_then(|n| n.parent);
        }
    }

    /// Revalidate the whole tree.
    pub fn validate_all(&mut self) {
        if let Some(root) = self.root {
            self.refresh_subtree(root);
        }
    }

    /// Whether no control is invalid.
    pub fn is_valid(&self) -> bool {
        self.root
            .and_then(|r| self.node(r))
            .is_none_or(|n| n.status != ControlStatus::Invalid)
    }

    /// Attach `child` to `group` under `key`.
    pub fn insert_group_child(&mut self, group: NodeId, key: &str, child: NodeId) -> bool {
        let Some(ControlNode {
            kind: ControlKind::Group(children),
            ..
        }) = self.node_mut(group)
        else {
            return false;
        };
        children.insert(key.to_string(), child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(group);
        }
        true
    }

    /// Detach and free the member `key` of `group`.
    pub fn remove_group_child(&mut self, group: NodeId, key: &str) -> bool {
        let Some(ControlNode {
            kind: ControlKind::Group(children),
            ..
        }) = self.node_mut(group)
        else {
            return false;
        };
        match children.shift_remove(key) {
            Some(child) => {
                self.free_subtree(child);
                true
            }
            None => false,
        }
    }

    /// Insert `child` into `list` at `index` (clamped to the end).
    pub fn insert_list_child(&mut self, list: NodeId, index: usize, child: NodeId) -> bool {
        let Some(ControlNode {
            kind: ControlKind::List(children),
            ..
        }) = self.node_mut(list)
        else {
            return false;
        };
        let index = index.min(children.len());
        children.insert(index, child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(list);
        }
        true
    }

    pub fn push_list_child(&mut self, list: NodeId, child: NodeId) -> bool {
        self.insert_list_child(list, usize::MAX, child)
    }

    /// Detach and free the item at `index` of `list`.
    pub fn remove_list_child(&mut self, list: NodeId, index: usize) -> bool {
        let Some(ControlNode {
            kind: ControlKind::List(children),
            ..
        }) = self.node_mut(list)
        else {
            return false;
        };
        if index >= children.len() {
            return false;
        }
        let child = children.remove(index);
        self.free_subtree(child);
        true
    }

    /// Move the item at `from` to position `to`, keeping its id.
    pub fn move_list_child(&mut self, list: NodeId, from: usize, to: usize) -> bool {
        let Some(ControlNode {
            kind: ControlKind::List(children),
            ..
        }) = self.node_mut(list)
        else {
            return false;
        };
        if from >= children.len() || to >= children.len() {
            return false;
        }
        let child = children.remove(from);
        children.insert(to, child);
        true
    }

    /// Number of items of a list control.
    pub fn list_len(&self, list: NodeId) -> Option<usize> {
        match &self.node(list)?.kind {
            ControlKind::List(children) => Some(children.len()),
            _ => None,
        }
    }

    /// Drop every subscription of every control.
    pub fn clear_subscriptions(&mut self) {
        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            node.value_changes.clear();
            node.status_changes.clear();
        }
    }
}

fn children_of(kind: &ControlKind) -> Vec<NodeId> {
    match kind {
        ControlKind::Group(children) => children.values().copied().collect(),
        ControlKind::List(children) => children.clone(),
        ControlKind::Leaf(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        data::{FormCompilationContext, FormInput},
        layout::BuiltinWidgets,
        options::FormOptions,
    };
    use serde_json::json;

    fn tree(schema: Value, data: Option<Value>) -> ControlTree {
        let mut input = FormInput::new(schema);
        if let Some(data) = data {
            input = input.with_data(data);
        }
        let ctx = FormCompilationContext::compile(input, FormOptions::default(), &BuiltinWidgets::new()).unwrap();
        ControlTree::from_context(&ctx)
    }

    fn person() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    #[test]
    fn test_values_and_lookup() {
        let tree = tree(person(), Some(json!({"name": "a", "tags": ["x", "y"]})));
        let root = tree.root().unwrap();
        assert_eq!(tree.value(root), json!({"name": "a", "tags": ["x", "y"]}));
        let y = tree.get("/tags/1").unwrap();
        assert_eq!(tree.value(y), json!("y"));
        assert_eq!(tree.pointer_of(y).as_deref(), Some("/tags/1"));
        assert_eq!(tree.get("/tags/2"), None);
        assert_eq!(tree.get(""), Some(root));
        assert!(tree.is_valid());
    }

    #[test]
    fn test_set_value_revalidates_and_notifies() {
        let mut tree = tree(person(), None);
        let root = tree.root().unwrap();
        let name = tree.get("/name").unwrap();
        assert!(!tree.is_valid());
        assert_eq!(tree.node(name).unwrap().failure.as_ref().unwrap().keyword, "required");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        tree.node_mut(root).unwrap().value_changes.subscribe(move |v| sink.borrow_mut().push(v.clone()));
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let status_sink = statuses.clone();
        tree.node_mut(root)
            .unwrap()
            .status_changes
            .subscribe(move |s| status_sink.borrow_mut().push(*s));

        assert!(tree.set_value(name, json!("bob")));
        assert!(tree.is_valid());
        assert!(tree.node(name).unwrap().dirty);
        assert_eq!(seen.borrow()[0]["name"], json!("bob"));
        assert_eq!(*statuses.borrow(), vec![ControlStatus::Valid]);
    }

    #[test]
    fn test_list_structure() {
        let mut tree = tree(person(), Some(json!({"name": "a", "tags": ["a", "b", "c"]})));
        let tags = tree.get("/tags").unwrap();
        let first = tree.get("/tags/0").unwrap();
        assert!(tree.move_list_child(tags, 0, 2));
        assert_eq!(tree.value(tags), json!(["b", "c", "a"]));
        assert_eq!(tree.get("/tags/2"), Some(first));
        assert!(!tree.move_list_child(tags, 0, 3));

        assert!(tree.remove_list_child(tags, 2));
        assert!(tree.node(first).is_none());
        assert_eq!(tree.list_len(tags), Some(2));
        assert!(!tree.remove_list_child(tags, 5));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut tree = tree(person(), Some(json!({"name": "a", "tags": ["x"]})));
        let tags = tree.get("/tags").unwrap();
        let slots = tree.capacity();
        let mut first = None;
        for _ in 0..50 {
            let item = tree.alloc(Some(tags), ControlKind::Leaf(json!("y")), ValidatorSet::default(), false);
            first.get_or_insert(item);
            assert!(tree.push_list_child(tags, item));
            assert!(tree.remove_list_child(tags, 1));
        }
        assert_eq!(tree.capacity(), slots + 1);
        assert_eq!(tree.len(), slots);
        assert!(tree.node(first.unwrap()).is_none());
        assert_eq!(tree.value(tags), json!(["x"]));
    }

    #[test]
    fn test_branch_aliases() {
        let schema = json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}, "a": {"type": "string"}}},
                {"properties": {"kind": {"const": "b"}, "b": {"type": "integer"}}}
            ]
        });
        let tree = tree(schema, Some(json!({"kind": "b", "b": 2})));
        let b = tree.get("/b").unwrap();
        assert_eq!(tree.get("/~1oneOf~11/b"), Some(b));
        assert_eq!(tree.get("/~1oneOf~11"), tree.root());
        let root = tree.root().unwrap();
        let keys: Vec<String> = match &tree.node(root).unwrap().kind {
            ControlKind::Group(children) => children.keys().cloned().collect(),
            _ => Vec::new(),
        };
        assert_eq!(keys, vec!["kind", "b", "a"]);
    }

    #[test]
    fn test_recursive_refs_follow_data() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "child": {"$ref": "#"}}
        });
        let tree = tree(schema, Some(json!({"name": "a", "child": {"name": "b"}})));
        let inner = tree.get("/child/name").unwrap();
        assert_eq!(tree.value(inner), json!("b"));
        assert_eq!(tree.get("/child/child"), None);
        assert_eq!(tree.value(tree.root().unwrap()), json!({"name": "a", "child": {"name": "b"}}));
    }
}
