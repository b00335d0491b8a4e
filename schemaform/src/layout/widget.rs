//! Widget kinds and the widget registry contract.
//!
//! The compiler never renders anything. It only decides *which* widget a
//! layout node wants and asks the host's [`WidgetRegistry`] whether that
//! widget exists; the opaque [`WidgetHandle`] the registry hands back is
//! stored on the node for the renderer.

use std::{any::Any, fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{self, SchemaType};

/// Widget requested by a layout node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WidgetKind {
    Text,
    Textarea,
    Password,
    Email,
    Url,
    Number,
    Integer,
    Range,
    Checkbox,
    Checkboxes,
    Radios,
    Select,
    Date,
    DateTime,
    Time,
    Color,
    File,
    Hidden,
    None,
    Section,
    Fieldset,
    Flex,
    Array,
    TabArray,
    Tabs,
    Tab,
    OneOf,
    Ref,
    Help,
    Message,
    Button,
    Submit,
    /// A host-defined widget.
    Custom(String),
}

const BUILTIN: &[WidgetKind] = &[
    WidgetKind::Text,
    WidgetKind::Textarea,
    WidgetKind::Password,
    WidgetKind::Email,
    WidgetKind::Url,
    WidgetKind::Number,
    WidgetKind::Integer,
    WidgetKind::Range,
    WidgetKind::Checkbox,
    WidgetKind::Checkboxes,
    WidgetKind::Radios,
    WidgetKind::Select,
    WidgetKind::Date,
    WidgetKind::DateTime,
    WidgetKind::Time,
    WidgetKind::Color,
    WidgetKind::File,
    WidgetKind::Hidden,
    WidgetKind::None,
    WidgetKind::Section,
    WidgetKind::Fieldset,
    WidgetKind::Flex,
    WidgetKind::Array,
    WidgetKind::TabArray,
    WidgetKind::Tabs,
    WidgetKind::Tab,
    WidgetKind::OneOf,
    WidgetKind::Ref,
    WidgetKind::Help,
    WidgetKind::Message,
    WidgetKind::Button,
    WidgetKind::Submit,
];

impl WidgetKind {
    /// Parse a widget name; anything unknown becomes [`WidgetKind::Custom`].
    pub fn parse(name: &str) -> Self {
        BUILTIN
            .iter()
            .find(|kind| kind.as_str() == name)
            .cloned()
            .unwrap_or_else(|| match name {
                "string" => WidgetKind::Text,
                "datetime-local" | "date-time" => WidgetKind::DateTime,
                "uri" => WidgetKind::Url,
                "radio" | "radiobuttons" => WidgetKind::Radios,
                "advancedfieldset" | "authfieldset" => WidgetKind::Fieldset,
                "tabarray" => WidgetKind::TabArray,
                "one-of" => WidgetKind::OneOf,
                "$ref" => WidgetKind::Ref,
                other => WidgetKind::Custom(other.to_string()),
            })
    }

    pub fn as_str(&self) -> &str {
        match self {
            WidgetKind::Text => "text",
            WidgetKind::Textarea => "textarea",
            WidgetKind::Password => "password",
            WidgetKind::Email => "email",
            WidgetKind::Url => "url",
            WidgetKind::Number => "number",
            WidgetKind::Integer => "integer",
            WidgetKind::Range => "range",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::Checkboxes => "checkboxes",
            WidgetKind::Radios => "radios",
            WidgetKind::Select => "select",
            WidgetKind::Date => "date",
            WidgetKind::DateTime => "datetime",
            WidgetKind::Time => "time",
            WidgetKind::Color => "color",
            WidgetKind::File => "file",
            WidgetKind::Hidden => "hidden",
            WidgetKind::None => "none",
            WidgetKind::Section => "section",
            WidgetKind::Fieldset => "fieldset",
            WidgetKind::Flex => "flex",
            WidgetKind::Array => "array",
            WidgetKind::TabArray => "tab-array",
            WidgetKind::Tabs => "tabs",
            WidgetKind::Tab => "tab",
            WidgetKind::OneOf => "one-of-selector",
            WidgetKind::Ref => "ref",
            WidgetKind::Help => "help",
            WidgetKind::Message => "message",
            WidgetKind::Button => "button",
            WidgetKind::Submit => "submit",
            WidgetKind::Custom(name) => name,
        }
    }

    /// Widgets that hold child layout nodes.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            WidgetKind::Section
                | WidgetKind::Fieldset
                | WidgetKind::Flex
                | WidgetKind::Array
                | WidgetKind::TabArray
                | WidgetKind::Tabs
                | WidgetKind::Tab
                | WidgetKind::OneOf
        )
    }

    /// Widgets whose children are array items.
    pub fn is_array(&self) -> bool {
        matches!(self, WidgetKind::Array | WidgetKind::TabArray)
    }

    /// Widgets that do not edit data.
    pub fn is_decoration(&self) -> bool {
        matches!(
            self,
            WidgetKind::Help | WidgetKind::Message | WidgetKind::Button | WidgetKind::Submit
        )
    }
}

impl From<String> for WidgetKind {
    fn from(name: String) -> Self {
        WidgetKind::parse(&name)
    }
}

impl From<WidgetKind> for String {
    fn from(kind: WidgetKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the widget for a schema node.
pub fn widget_for(schema: &Value) -> WidgetKind {
    let hint = schema
        .get("x-schema-form")
        .and_then(|x| x.get("type").or_else(|| x.get("widget")))
        .or_else(|| schema.get("x-widget"))
        .or_else(|| schema.get("widget"))
        .and_then(Value::as_str);
    if let Some(name) = hint {
        return WidgetKind::parse(name);
    }
    if schema::placeholder_target(schema).is_some() {
        return WidgetKind::Ref;
    }
    let has_options = !schema::title_map(schema).is_empty();
    match schema::primary_type(schema) {
        Some(SchemaType::Object) => WidgetKind::Section,
        Some(SchemaType::Array) => {
            let unique = schema.get("uniqueItems") == Some(&Value::Bool(true));
            if has_options && unique {
                WidgetKind::Checkboxes
            } else {
                WidgetKind::Array
            }
        }
        Some(SchemaType::Boolean) => WidgetKind::Checkbox,
        Some(SchemaType::Null) => WidgetKind::None,
        Some(SchemaType::Integer | SchemaType::Number) if has_options => WidgetKind::Select,
        Some(SchemaType::Integer) => WidgetKind::Integer,
        Some(SchemaType::Number) => WidgetKind::Number,
        _ if has_options => WidgetKind::Select,
        _ => {
            if schema.get("writeOnly") == Some(&Value::Bool(true)) {
                return WidgetKind::Password;
            }
            match schema.get("format").and_then(Value::as_str) {
                Some("date") => WidgetKind::Date,
                Some("date-time") => WidgetKind::DateTime,
                Some("time") => WidgetKind::Time,
                Some("email") => WidgetKind::Email,
                Some("uri" | "url") => WidgetKind::Url,
                Some("color") => WidgetKind::Color,
                Some("data-url") => WidgetKind::File,
                Some("password") => WidgetKind::Password,
                Some("textarea") => WidgetKind::Textarea,
                _ => WidgetKind::Text,
            }
        }
    }
}

/// Opaque renderer-side widget reference.
#[derive(Clone)]
pub struct WidgetHandle(Arc<dyn Any + Send + Sync>);

impl WidgetHandle {
    pub fn new<T: Any + Send + Sync>(widget: T) -> Self {
        Self(Arc::new(widget))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for WidgetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WidgetHandle")
    }
}

impl PartialEq for WidgetHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Source of widget implementations.
pub trait WidgetRegistry {
    fn has_widget(&self, kind: &WidgetKind) -> bool;
    fn get_widget(&self, kind: &WidgetKind) -> Option<WidgetHandle>;
}

/// Registry knowing every built-in kind plus any registered custom kinds.
///
/// Built-in handles carry the widget name as a `String`.
#[derive(Debug, Clone)]
pub struct BuiltinWidgets {
    handles: IndexMap<WidgetKind, WidgetHandle>,
}

impl Default for BuiltinWidgets {
    fn default() -> Self {
        let handles = BUILTIN
            .iter()
            .map(|kind| (kind.clone(), WidgetHandle::new(kind.as_str().to_string())))
            .collect();
        Self { handles }
    }
}

impl BuiltinWidgets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a widget under `kind`.
    pub fn register(&mut self, kind: WidgetKind, handle: WidgetHandle) {
        self.handles.insert(kind, handle);
    }
}

impl WidgetRegistry for BuiltinWidgets {
    fn has_widget(&self, kind: &WidgetKind) -> bool {
        self.handles.contains_key(kind)
    }

    fn get_widget(&self, kind: &WidgetKind) -> Option<WidgetHandle> {
        self.handles.get(kind).cloned()
    }
}
