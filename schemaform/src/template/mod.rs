//! Control templates.
//!
//! A template is the data-free blueprint of the live control tree: groups for
//! objects, lists for arrays, leaves for scalars. Two kinds exist only in
//! templates. A [`ControlTemplate::Conditional`] holds the alternatives of a
//! combinator and is merged into its parent when the tree is materialized.
//! A [`ControlTemplate::Ref`] names an entry of the [`TemplateRefLibrary`]
//! and is expanded only when data exists for it, which is how recursive
//! schemas stay finite.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::{pointer, schema::CombinatorKind};

/// Template building.
pub mod build;
/// Keyword validators attached to templates.
pub mod validators;

pub use validators::{Failure, NamedValidator, ValidatorSet};

/// Library key (`#/definitions/x` or a generic list item pointer) → template.
///
/// `None` marks an entry whose template is still being built.
pub type TemplateRefLibrary = IndexMap<String, Option<ControlTemplate>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTemplate {
    pub controls: IndexMap<String, ControlTemplate>,
    pub validators: ValidatorSet,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTemplate {
    pub controls: Vec<ControlTemplate>,
    /// Library key of the list item template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<String>,
    pub tuple_items: usize,
    pub min_items: usize,
    pub validators: ValidatorSet,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafTemplate {
    /// Initial value.
    pub value: Value,
    pub validators: ValidatorSet,
    pub disabled: bool,
}

/// One alternative of a conditional.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchTemplate {
    pub index: usize,
    pub schema_pointer: String,
    pub template: ControlTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalTemplate {
    pub kind: CombinatorKind,
    /// Schema pointer of the node owning the combinator.
    pub schema_pointer: String,
    pub branches: Vec<BranchTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefTemplate {
    /// Key into the [`TemplateRefLibrary`].
    pub pointer: String,
    pub recursive: bool,
}

/// A node of the control template tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControlTemplate {
    Group(GroupTemplate),
    List(ListTemplate),
    Leaf(LeafTemplate),
    Conditional(ConditionalTemplate),
    Ref(RefTemplate),
}

impl ControlTemplate {
    /// Short name of the variant, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ControlTemplate::Group(_) => "group",
            ControlTemplate::List(_) => "list",
            ControlTemplate::Leaf(_) => "leaf",
            ControlTemplate::Conditional(_) => "conditional",
            ControlTemplate::Ref(_) => "ref",
        }
    }

    /// Find the template at a template pointer (`/controls/a/controls/0`).
    ///
    /// Conditional branches are addressed as `/branches/<i>/template`.
    pub fn get(&self, template_pointer: &str) -> Option<&ControlTemplate> {
        let keys = pointer::parse(template_pointer).ok()?;
        let mut node = self;
        let mut keys = keys.iter();
        while let Some(section) = keys.next() {
            let key = keys.next()?;
            node = match (node, section.as_str()) {
                (ControlTemplate::Group(group), "controls") => group.controls.get(key)?,
                (ControlTemplate::List(list), "controls") => list.controls.get(key.parse::<usize>().ok()?)?,
                (ControlTemplate::Conditional(cond), "branches") => {
                    let branch = cond.branches.get(key.parse::<usize>().ok()?)?;
                    match keys.next().map(String::as_str) {
                        Some("template") => &branch.template,
                        _ => return None,
                    }
                }
                _ => return None,
            };
        }
        Some(node)
    }

    /// Mutable variant of [`ControlTemplate::get`].
    pub fn get_mut(&mut self, template_pointer: &str) -> Option<&mut ControlTemplate> {
        let keys = pointer::parse(template_pointer).ok()?;
        let mut node = self;
        let mut keys = keys.iter();
        while let Some(section) = keys.next() {
            let key = keys.next()?;
            node = match (node, section.as_str()) {
                (ControlTemplate::Group(group), "controls") => group.controls.get_mut(key)?,
                (ControlTemplate::List(list), "controls") => {
                    list.controls.get_mut(key.parse::<usize>().ok()?)?
                }
                (ControlTemplate::Conditional(cond), "branches") => {
                    let branch = cond.branches.get_mut(key.parse::<usize>().ok()?)?;
                    match keys.next().map(String::as_str) {
                        Some("template") => &mut branch.template,
                        _ => return None,
                    }
                }
                _ => return None,
            };
        }
        Some(node)
    }

    /// Number of templates in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + match self {
            ControlTemplate::Group(group) => group.controls.values().map(Self::size).sum(),
            ControlTemplate::List(list) => list.controls.iter().map(Self::size).sum(),
            ControlTemplate::Conditional(cond) => cond.branches.iter().map(|b| b.template.size()).sum(),
            ControlTemplate::Leaf(_) | ControlTemplate::Ref(_) => 0,
        }
    }
}

/// Template pointer of a child control.
pub fn child_pointer(template_pointer: &str, key: &str) -> String {
    pointer::join(&pointer::join(template_pointer, "controls"), key)
}

/// Template pointer of a conditional branch.
pub fn branch_pointer(template_pointer: &str, index: usize) -> String {
    pointer::join(
        &pointer::join_index(&pointer::join(template_pointer, "branches"), index),
        "template",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(value: Value) -> ControlTemplate {
        ControlTemplate::Leaf(LeafTemplate {
            value,
            validators: ValidatorSet::default(),
            disabled: false,
        })
    }

    #[test]
    fn test_template_pointers() {
        let mut inner = IndexMap::new();
        inner.insert("x".to_string(), leaf(json!(1)));
        let cond = ControlTemplate::Conditional(ConditionalTemplate {
            kind: CombinatorKind::OneOf,
            schema_pointer: String::new(),
            branches: vec![BranchTemplate {
                index: 0,
                schema_pointer: "/oneOf/0".into(),
                template: ControlTemplate::Group(GroupTemplate {
                    controls: inner,
                    validators: ValidatorSet::default(),
                    disabled: false,
                }),
            }],
        });
        let mut controls = IndexMap::new();
        controls.insert("~1oneOf".to_string(), cond);
        let mut root = ControlTemplate::Group(GroupTemplate {
            controls,
            validators: ValidatorSet::default(),
            disabled: false,
        });

        let path = child_pointer(&branch_pointer(&child_pointer("", "~1oneOf"), 0), "x");
        assert_eq!(path, "/controls/~01oneOf/branches/0/template/controls/x");
        assert_eq!(root.get(&path), Some(&leaf(json!(1))));
        if let Some(ControlTemplate::Leaf(l)) = root.get_mut(&path) {
            l.value = json!(2);
        }
        assert_eq!(root.get(&path), Some(&leaf(json!(2))));
        assert_eq!(root.get("/controls/missing"), None);
        assert_eq!(root.size(), 4);
    }
}
