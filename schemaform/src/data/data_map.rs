//! The data map: per-field facts keyed by generic data pointer.
//!
//! Entries are written while the templates and the layout are built and read
//! whenever a value has to be coerced, formatted or validated. A field's
//! schema type is set once by the first builder that sees it; only combinator
//! branch selection may switch it afterwards.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::{
    layout::WidgetKind,
    pointer::{self, ArrayMap, RecursiveRefMap},
    schema::{CombinatorKind, SchemaType},
};

/// Array sizing derived from the schema, the seed data and the options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArraySizing {
    /// `minItems`.
    pub min_items: usize,
    /// `maxItems`, if any.
    pub max_items: Option<usize>,
    /// Number of fixed tuple slots.
    pub tuple_items: usize,
    /// Number of list items seeded after the tuple slots.
    pub list_items: usize,
}

impl ArraySizing {
    /// Sizing of an array node with `tuple_items` fixed slots.
    ///
    /// Seeded arrays keep their length. Unseeded arrays with a list item
    /// show `list_items` items (at least enough to reach `minItems`, at most
    /// `maxItems`).
    pub fn for_schema(
        schema: &Value,
        tuple_items: usize,
        has_list_item: bool,
        seeded_len: Option<usize>,
        list_items: usize,
    ) -> Self {
        let min_items = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0) as usize;
        let max_items = schema.get("maxItems").and_then(Value::as_u64).map(|n| n as usize);
        let list_items = match (has_list_item, seeded_len) {
            (false, _) => 0,
            (true, Some(len)) => len.saturating_sub(tuple_items),
            (true, None) => {
                let wanted = list_items.max(min_items.saturating_sub(tuple_items));
                match max_items {
                    Some(max) => wanted.min(max.saturating_sub(tuple_items)),
                    None => wanted,
                }
            }
        };
        Self {
            min_items,
            max_items,
            tuple_items,
            list_items,
        }
    }

    /// Whether another item may be appended to an array of `len` items.
    pub fn can_add(&self, len: usize) -> bool {
        self.max_items.is_none_or(|max| len < max)
    }

    /// Whether an item may be removed from an array of `len` items.
    pub fn can_remove(&self, len: usize) -> bool {
        len > self.min_items.max(self.tuple_items)
    }
}

/// One branch of a combinator site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSite {
    /// Branch position.
    pub index: usize,
    /// Schema pointer of the branch.
    pub schema_pointer: String,
    /// Synthetic root key under which the branch template is registered.
    pub root_key: String,
    /// Property names the branch contributes.
    pub properties: Vec<String>,
}

/// A combinator attached to a data position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinatorSite {
    /// Which combinator.
    pub kind: CombinatorKind,
    /// Schema pointer of the node owning the combinator.
    pub schema_pointer: String,
    /// Its branches.
    pub branches: Vec<BranchSite>,
}

impl CombinatorSite {
    /// Key identifying this site among all sites of a form.
    pub fn key(&self) -> String {
        pointer::join(&self.schema_pointer, self.kind.keyword())
    }
}

/// Back reference from a synthetic root key to its combinator site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRef {
    /// Which combinator.
    pub kind: CombinatorKind,
    /// Branch position.
    pub index: usize,
    /// Generic data pointer of the level the branch applies to.
    pub data_pointer: String,
}

/// Facts about one generic data position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMapEntry {
    /// Declared (or currently active) schema type.
    pub schema_type: Option<SchemaType>,
    /// Whether `null` is an accepted value.
    pub nullable: bool,
    /// Schema pointer the field was first described by.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_pointer: Option<String>,
    /// Template pointer of the field's control template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_pointer: Option<String>,
    /// Widget chosen by the layout builder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetKind>,
    /// `readOnly` in the schema.
    pub disabled: bool,
    /// Listed in the parent's `required`.
    pub required: bool,
    /// Sizing, for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array: Option<ArraySizing>,
    /// Combinators applying at this position.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub combinators: Vec<CombinatorSite>,
    /// Set on synthetic root keys of combinator branches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchRef>,
    /// Template library key of a recursive reference at this position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_ref: Option<String>,
}

/// Generic data pointer → [`DataMapEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataMap {
    entries: IndexMap<String, DataMapEntry>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, generic: &str) -> Option<&DataMapEntry> {
        self.entries.get(generic)
    }

    pub fn get_mut(&mut self, generic: &str) -> Option<&mut DataMapEntry> {
        self.entries.get_mut(generic)
    }

    pub fn contains(&self, generic: &str) -> bool {
        self.entries.contains_key(generic)
    }

    /// The entry at `generic`, created empty on first access.
    pub fn entry(&mut self, generic: &str) -> &mut DataMapEntry {
        self.entries.entry(generic.to_string()).or_default()
    }

    /// Record the schema type of a field unless one is already known.
    pub fn set_type_once(&mut self, generic: &str, ty: Option<SchemaType>, nullable: bool) {
        let entry = self.entry(generic);
        if entry.schema_type.is_none() {
            entry.schema_type = ty;
            entry.nullable = nullable;
        }
    }

    /// Switch the type of an existing field to the one of an active branch.
    ///
    /// Returns `true` if the type changed.
    pub fn switch_type(&mut self, generic: &str, ty: SchemaType) -> bool {
        match self.entries.get_mut(generic) {
            Some(entry) if entry.schema_type != Some(ty) => {
                debug!("data map: {generic} switches to {ty}");
                entry.schema_type = Some(ty);
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataMapEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Generic pointer of an indexed data pointer, collapsing recursion.
pub fn generic_pointer(indexed: &str, recursive: &RecursiveRefMap, array_map: &ArrayMap) -> String {
    pointer::to_generic_with_recursion(indexed, recursive, array_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_is_set_once() {
        let mut map = DataMap::new();
        map.set_type_once("/a", Some(SchemaType::String), false);
        map.set_type_once("/a", Some(SchemaType::Integer), true);
        assert_eq!(map.get("/a").unwrap().schema_type, Some(SchemaType::String));
        assert!(!map.get("/a").unwrap().nullable);

        assert!(map.switch_type("/a", SchemaType::Integer));
        assert!(!map.switch_type("/a", SchemaType::Integer));
        assert!(!map.switch_type("/missing", SchemaType::Integer));
        assert_eq!(map.get("/a").unwrap().schema_type, Some(SchemaType::Integer));
    }

    #[test]
    fn test_array_sizing_bounds() {
        let sizing = ArraySizing {
            min_items: 1,
            max_items: Some(2),
            tuple_items: 0,
            list_items: 1,
        };
        assert!(sizing.can_add(1));
        assert!(!sizing.can_add(2));
        assert!(!sizing.can_remove(1));
        assert!(sizing.can_remove(2));
    }

    #[test]
    fn test_sizing_from_schema() {
        let schema = serde_json::json!({"minItems": 2, "maxItems": 3});
        let unseeded = ArraySizing::for_schema(&schema, 0, true, None, 1);
        assert_eq!(unseeded.list_items, 2);
        let capped = ArraySizing::for_schema(&schema, 0, true, None, 5);
        assert_eq!(capped.list_items, 3);
        let seeded = ArraySizing::for_schema(&schema, 1, true, Some(4), 1);
        assert_eq!(seeded.list_items, 3);
        let tuple_only = ArraySizing::for_schema(&schema, 2, false, Some(2), 1);
        assert_eq!(tuple_only.list_items, 0);
    }
}
