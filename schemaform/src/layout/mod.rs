//! Layout trees.
//!
//! A layout tree describes where widgets go and what they show. Data
//! pointers on layout nodes are generic (list indices are `-`); the index of
//! a list item is implied by its position among its siblings, which lets one
//! cached item layout serve every item of a list.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    data::data_map::ArraySizing,
    pointer,
    schema::{CombinatorKind, TitleMapItem},
    template::ValidatorSet,
};

/// Layout synthesis.
pub mod build;
/// Widget kinds and the widget registry.
pub mod widget;

pub use widget::{BuiltinWidgets, WidgetHandle, WidgetKind, WidgetRegistry, widget_for};

/// Library key → cached layout node (`None` while being built).
pub type LayoutRefLibrary = IndexMap<String, Option<LayoutNode>>;

/// How an array item got into its array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayItemType {
    Tuple,
    List,
}

/// Visibility condition of an `if/then/else` branch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Schema pointer of the `if` subschema.
    pub if_pointer: String,
    /// Show when `if` does *not* match (`else` branch).
    pub negate: bool,
}

/// Display options of a layout node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub read_only: bool,
    /// Schema constraints, for display (`maxlength` attributes and such).
    #[serde(skip_serializing_if = "ValidatorSet::is_empty")]
    pub validators: ValidatorSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_group: Option<CombinatorKind>,
    pub addable: bool,
    pub orderable: bool,
    pub removable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array: Option<ArraySizing>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub title_map: Vec<TitleMapItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Branch initially shown by a `oneOf` selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_branch: Option<usize>,
    /// Keys passed through from the user layout and widget defaults.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One node of the layout tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_pointer: Option<String>,
    #[serde(rename = "type")]
    pub widget: WidgetKind,
    pub options: LayoutOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LayoutNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_item: Option<ArrayItemType>,
    /// Library key this node expands (add buttons and recursive clones).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_pointer: Option<String>,
    pub recursive_reference: bool,
    #[serde(skip)]
    pub handle: Option<WidgetHandle>,
}

impl LayoutNode {
    /// A node with default options.
    pub fn new(id: String, widget: WidgetKind) -> Self {
        Self {
            id,
            name: None,
            data_pointer: None,
            schema_pointer: None,
            widget,
            options: LayoutOptions::default(),
            items: Vec::new(),
            array_item: None,
            ref_pointer: None,
            recursive_reference: false,
            handle: None,
        }
    }

    /// Whether this node is the "add item" affordance of an array or a
    /// recursive reference.
    pub fn is_add_button(&self) -> bool {
        self.widget == WidgetKind::Ref
    }

    /// Give this subtree fresh ids.
    pub fn refresh_ids(&mut self, next_id: &mut impl FnMut() -> String) {
        self.id = next_id();
        for item in &mut self.items {
            item.refresh_ids(next_id);
        }
    }

    /// Move every data pointer under `from` to the same place under `to`.
    pub fn rebase(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(data_pointer) = &mut self.data_pointer
            && pointer::is_sub_pointer(from, data_pointer)
        {
            *data_pointer = format!("{to}{}", &data_pointer[from.len()..]);
        }
        for item in &mut self.items {
            item.rebase(from, to);
        }
    }

    /// Node at a child-index path.
    pub fn node_at(&self, path: &[usize]) -> Option<&LayoutNode> {
        path.iter().try_fold(self, |node, &i| node.items.get(i))
    }

    /// Mutable node at a child-index path.
    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut LayoutNode> {
        path.iter().try_fold(self, |node, &i| node.items.get_mut(i))
    }

    /// Number of nodes in the subtree.
    pub fn size(&self) -> usize {
        1 + self.items.iter().map(LayoutNode::size).sum::<usize>()
    }

    /// Number of array item children.
    pub fn array_item_count(&self) -> usize {
        self.items.iter().filter(|i| i.array_item.is_some()).count()
    }

    /// Child-index path of the first node (pre-order) whose indexed data
    /// pointer is `target` and which satisfies `accept`.
    ///
    /// List item positions supply the indices of the generic pointers, so
    /// `/list/2/name` is found inside the third item of the `/list` array.
    pub fn find_path(&self, target: &str, accept: impl Fn(&LayoutNode) -> bool) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut indices = Vec::new();
        self.find_inner(target, &accept, &mut path, &mut indices)
            .then_some(path)
    }

    fn find_inner(
        &self,
        target: &str,
        accept: &dyn Fn(&LayoutNode) -> bool,
        path: &mut Vec<usize>,
        indices: &mut Vec<usize>,
    ) -> bool {
        if let Some(data_pointer) = &self.data_pointer {
            let indexed = pointer::to_indexed(data_pointer, indices);
            if indexed == target && accept(self) {
                return true;
            }
        }
        let mut position = 0;
        for (i, item) in self.items.iter().enumerate() {
            path.push(i);
            let found = match item.array_item {
                Some(ArrayItemType::List) => {
                    indices.push(position);
                    let found = item.find_inner(target, accept, path, indices);
                    indices.pop();
                    found
                }
                _ => item.find_inner(target, accept, path, indices),
            };
            if item.array_item.is_some() {
                position += 1;
            }
            if found {
                return true;
            }
            path.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, pointer: &str) -> LayoutNode {
        let mut node = LayoutNode::new(id.into(), WidgetKind::Text);
        node.data_pointer = Some(pointer.into());
        node
    }

    #[test]
    fn test_find_path_uses_item_positions() {
        let mut list = node("list", "/list");
        list.widget = WidgetKind::Array;
        for i in 0..3 {
            let mut item = node(&format!("item{i}"), "/list/-");
            item.widget = WidgetKind::Section;
            item.array_item = Some(ArrayItemType::List);
            item.items.push(node(&format!("name{i}"), "/list/-/name"));
            list.items.push(item);
        }
        let mut add = node("add", "/list/-");
        add.widget = WidgetKind::Ref;
        list.items.push(add);
        let mut root = LayoutNode::new("root".into(), WidgetKind::Section);
        root.data_pointer = Some(String::new());
        root.items.push(list);

        let path = root.find_path("/list/2/name", |_| true).unwrap();
        assert_eq!(path, vec![0, 2, 0]);
        assert_eq!(root.node_at(&path).unwrap().id, "name2");
        assert_eq!(root.find_path("/list", |_| true), Some(vec![0]));
        assert_eq!(root.find_path("/list/-", |n| n.is_add_button()), Some(vec![0, 3]));
        assert_eq!(root.find_path("/other", |_| true), None);
        assert_eq!(root.node_at(&[0]).unwrap().array_item_count(), 3);
    }

    #[test]
    fn test_rebase_and_refresh() {
        let mut item = node("a", "/child");
        item.items.push(node("b", "/child/name"));
        item.rebase("/child", "/child/child");
        assert_eq!(item.items[0].data_pointer.as_deref(), Some("/child/child/name"));

        let mut n = 0;
        item.refresh_ids(&mut || {
            n += 1;
            format!("x{n}")
        });
        assert_eq!(item.id, "x1");
        assert_eq!(item.items[0].id, "x2");
        assert_eq!(item.size(), 2);
    }
}
