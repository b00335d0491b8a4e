//! Template → live controls.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::{ControlKind, ControlTree, NodeId};
use crate::{
    data::DataMap,
    pointer,
    schema::ResolvedSchema,
    template::{ConditionalTemplate, ControlTemplate, TemplateRefLibrary, validators::select_branches},
};

/// Builds controls into a [`ControlTree`].
pub struct Materializer<'a> {
    pub tree: &'a mut ControlTree,
    pub library: &'a TemplateRefLibrary,
    pub resolved: &'a ResolvedSchema,
    pub data_map: &'a DataMap,
}

impl Materializer<'_> {
    /// Materialize the root template and register the branch key aliases.
    pub fn materialize_root(&mut self, template: &ControlTemplate, seed: Option<&Value>) -> Option<NodeId> {
        for (root_pointer, entry) in self.data_map.iter() {
            if let Some(branch) = &entry.branch
                && let Some(root_key) = pointer::last_key(root_pointer)
            {
                self.tree.add_alias(root_key, branch.data_pointer.clone());
            }
        }
        let root = self.materialize(template, None, seed);
        self.tree.set_root(root);
        root
    }

    /// Materialize one template under `parent`.
    ///
    /// Leaves take the seed value when there is one, the template value
    /// otherwise. Recursive references only expand where the seed has data.
    pub fn materialize(&mut self, template: &ControlTemplate, parent: Option<NodeId>, seed: Option<&Value>) -> Option<NodeId> {
        match template {
            ControlTemplate::Leaf(leaf) => {
                let value = seed.cloned().unwrap_or_else(|| leaf.value.clone());
                Some(
                    self.tree
                        .alloc(parent, ControlKind::Leaf(value), leaf.validators.clone(), leaf.disabled),
                )
            }
            ControlTemplate::Group(group) => {
                let id = self.tree.alloc(
                    parent,
                    ControlKind::Group(IndexMap::new()),
                    group.validators.clone(),
                    group.disabled,
                );
                self.merge_group_controls(id, parent.is_none(), &group.controls, seed);
                Some(id)
            }
            ControlTemplate::List(list) => {
                let id = self
                    .tree
                    .alloc(parent, ControlKind::List(Vec::new()), list.validators.clone(), list.disabled);
                let count = match seed.and_then(Value::as_array) {
                    Some(items) => items.len().max(list.tuple_items),
                    None => list.controls.len(),
                };
                let library = self.library;
                let item = list
                    .item_ref
                    .as_ref()
                    .and_then(|key| library.get(key))
                    .and_then(Option::as_ref);
                for i in 0..count {
                    let Some(template) = list.controls.get(i).or(item) else {
                        debug!("list has no template for item {i}");
                        break;
                    };
                    if let Some(child) = self.materialize(template, Some(id), seed.and_then(|s| s.get(i))) {
                        self.tree.push_list_child(id, child);
                    }
                }
                Some(id)
            }
            ControlTemplate::Conditional(cond) => {
                let first = self.branch_order(cond, seed).into_iter().next()?;
                let branch = cond.branches.iter().find(|b| b.index == first)?;
                self.materialize(&branch.template, parent, seed)
            }
            ControlTemplate::Ref(reference) => {
                let value = seed.filter(|v| !v.is_null())?;
                self.expand_ref(&reference.pointer, parent, Some(value))
            }
        }
    }

    /// Materialize the library template `key`, with or without data.
    pub fn expand_ref(&mut self, key: &str, parent: Option<NodeId>, seed: Option<&Value>) -> Option<NodeId> {
        let library = self.library;
        match library.get(key) {
            Some(Some(template)) => self.materialize(template, parent, seed),
            _ => {
                error!("no control template registered for {key}");
                None
            }
        }
    }

    /// Add the controls of a group template to the group control `id`.
    ///
    /// Conditionals are merged in branch order: members already present
    /// win, so shared keys come from the branch matching the seed.
    fn merge_group_controls(
        &mut self,
        id: NodeId,
        is_root: bool,
        controls: &IndexMap<String, ControlTemplate>,
        seed: Option<&Value>,
    ) {
        for (key, template) in controls {
            if let ControlTemplate::Conditional(cond) = template
                && *key == conditional_key(cond)
            {
                for index in self.branch_order(cond, seed) {
                    match cond.branches.iter().find(|b| b.index == index).map(|b| &b.template) {
                        Some(ControlTemplate::Group(group)) => {
                            self.merge_group_controls(id, false, &group.controls, seed);
                        }
                        Some(other) => debug!("{}: {} branch inside a group is skipped", cond.schema_pointer, other.kind_name()),
                        None => {}
                    }
                }
                continue;
            }
            if is_root && self.is_branch_key(key) {
                continue;
            }
            if self.has_member(id, key) {
                continue;
            }
            if let Some(child) = self.materialize(template, Some(id), seed.and_then(|s| s.get(key))) {
                self.tree.insert_group_child(id, key, child);
            }
        }
    }

    fn has_member(&self, id: NodeId, key: &str) -> bool {
        matches!(
            self.tree.node(id).map(|n| &n.kind),
            Some(ControlKind::Group(children)) if children.contains_key(key)
        )
    }

    fn is_branch_key(&self, key: &str) -> bool {
        self.data_map
            .get(&pointer::branch_root_pointer(&pointer::unescape(key)))
            .is_some_and(|e| e.branch.is_some())
    }

    /// Branch indices, the ones matching the seed first.
    fn branch_order(&self, cond: &ConditionalTemplate, seed: Option<&Value>) -> Vec<usize> {
        let empty = Value::Object(Map::new());
        let candidate = seed.unwrap_or(&empty);
        let mut order = match self.resolved.subschema(&cond.schema_pointer) {
            Some(owner) => select_branches(cond.kind, owner, candidate, self.resolved, &[]),
            None => Vec::new(),
        };
        for branch in &cond.branches {
            if !order.contains(&branch.index) {
                order.push(branch.index);
            }
        }
        order
    }
}

/// Key a group-level conditional is stored under in its group template.
fn conditional_key(cond: &ConditionalTemplate) -> String {
    pointer::escape(&pointer::join(&cond.schema_pointer, cond.kind.keyword()))
}
