//! Global form options.
//!
//! Options are plain serde data so they can be read from the same JSON or
//! TOML files as schemas and data:
//!
//! ```toml
//! setSchemaDefaults = "auto"
//! setLayoutDefaults = true
//! validateOnRender = false
//! returnEmptyFields = false
//!
//! [defaultWidgetOptions]
//! listItems = 1
//! orderable = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tri-state switch written as `true`, `false` or `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRepr", into = "PolicyRepr")]
pub enum Policy {
    /// `true`
    Always,
    /// `false`
    Never,
    /// `"auto"`
    Auto,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PolicyRepr {
    Flag(bool),
    Text(String),
}

impl TryFrom<PolicyRepr> for Policy {
    type Error = String;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            PolicyRepr::Flag(true) => Ok(Policy::Always),
            PolicyRepr::Flag(false) => Ok(Policy::Never),
            PolicyRepr::Text(s) if s.eq_ignore_ascii_case("auto") => Ok(Policy::Auto),
            PolicyRepr::Text(s) => Err(format!("expected true, false or \"auto\", got {s:?}")),
        }
    }
}

impl From<Policy> for PolicyRepr {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Always => PolicyRepr::Flag(true),
            Policy::Never => PolicyRepr::Flag(false),
            Policy::Auto => PolicyRepr::Text("auto".into()),
        }
    }
}

impl Policy {
    /// Whether defaults should be applied.
    ///
    /// `Auto` applies them only when the caller supplied no data.
    pub fn applies(self, has_external_data: bool) -> bool {
        match self {
            Policy::Always => true,
            Policy::Never => false,
            Policy::Auto => !has_external_data,
        }
    }

    /// Whether a control's errors should be shown.
    ///
    /// `Never` waits for the control to be edited, `Auto` additionally shows
    /// errors of controls that already hold a value.
    pub fn shows_errors(self, dirty: bool, has_value: bool) -> bool {
        match self {
            Policy::Always => true,
            Policy::Never => dirty,
            Policy::Auto => dirty || has_value,
        }
    }
}

/// Options merged into every layout node unless the node overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetOptions {
    /// Arrays get an "add" affordance.
    pub addable: bool,
    /// Array items may be reordered.
    pub orderable: bool,
    /// Array items may be removed.
    pub removable: bool,
    /// Minimum number of list items shown when the data has none.
    pub list_items: usize,
    /// Any other key, passed through to layout node options untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WidgetOptions {
    fn default() -> Self {
        Self {
            addable: true,
            orderable: true,
            removable: true,
            list_items: 1,
            extra: Map::new(),
        }
    }
}

/// Global options of one form instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormOptions {
    /// Apply schema `default` values while seeding.
    pub set_schema_defaults: Policy,
    /// Apply layout `default` values while seeding.
    pub set_layout_defaults: Policy,
    /// Show validation errors before the user edits a control.
    pub validate_on_render: Policy,
    /// Keep empty or uncoercible fields as `null` instead of dropping them.
    pub return_empty_fields: bool,
    /// Refuse submission while the form is invalid.
    pub disable_invalid_submit: bool,
    /// Append a submit button to layouts that have none.
    pub add_submit: Policy,
    /// Defaults for per-field widget options.
    pub default_widget_options: WidgetOptions,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            set_schema_defaults: Policy::Auto,
            set_layout_defaults: Policy::Auto,
            validate_on_render: Policy::Never,
            return_empty_fields: false,
            disable_invalid_submit: false,
            add_submit: Policy::Never,
            default_widget_options: WidgetOptions::default(),
        }
    }
}

impl FormOptions {
    /// Read options from a `.json` or `.toml` file.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, unsupported extensions and malformed content.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let value = crate::data::context::load_value(path.as_ref())?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_from_json() {
        let opts: FormOptions = serde_json::from_value(json!({
            "setSchemaDefaults": true,
            "setLayoutDefaults": "auto",
            "validateOnRender": false,
            "returnEmptyFields": true,
            "defaultWidgetOptions": {"listItems": 0, "htmlClass": "x"}
        }))
        .unwrap();
        assert_eq!(opts.set_schema_defaults, Policy::Always);
        assert_eq!(opts.set_layout_defaults, Policy::Auto);
        assert_eq!(opts.validate_on_render, Policy::Never);
        assert!(opts.return_empty_fields);
        assert_eq!(opts.default_widget_options.list_items, 0);
        assert!(opts.default_widget_options.addable);
        assert_eq!(opts.default_widget_options.extra["htmlClass"], json!("x"));
    }

    #[test]
    fn test_policy_rejects_garbage() {
        let err = serde_json::from_value::<Policy>(json!("sometimes"));
        assert!(err.is_err());
    }

    #[test]
    fn test_policy_applies() {
        assert!(Policy::Auto.applies(false));
        assert!(!Policy::Auto.applies(true));
        assert!(Policy::Always.applies(true));
        assert!(!Policy::Never.applies(false));
    }
}
