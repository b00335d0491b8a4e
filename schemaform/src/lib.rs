//! # schemaform
//!
//! A JSON Schema form-model compiler.
//!
//! Given a JSON Schema, an optional declarative layout and optional initial
//! data, schemaform builds
//!
//! - a **layout tree** saying which widget goes where and what it shows,
//! - a **control template** mirroring the schema, and from it
//! - a live **control tree** kept in sync with the data and with a JSON
//!   Schema validator.
//!
//! Rendering is left to the host: widgets are looked up through a
//! [`WidgetRegistry`] and only referenced by opaque handles.
//!
//! ## Quick Start
//!
//! ```rust
//! use schemaform::{FormInput, FormInstance, FormOptions};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
//! });
//! let input = FormInput::new(schema).with_data(json!({"tags": ["a", "b"]}));
//! let mut form = FormInstance::new(input, FormOptions::default());
//! form.initialize().unwrap();
//!
//! assert!(form.add_item("/tags", None));
//! form.set_value("/tags/2", json!("c")).unwrap();
//! assert_eq!(form.data(), Some(&json!({"tags": ["a", "b", "c"]})));
//! ```
//!
//! ## Modules
//!
//! - [`pointer`] - JSON Pointer algebra
//! - [`schema`] - schema helpers and `$ref` resolution
//! - [`layout`] - layout trees and widgets
//! - [`template`] - control templates and keyword validators
//! - [`control`] - the live control tree
//! - [`sync`] - formatting, validation and notification
//! - [`mutate`] - adding, removing and moving items
//! - [`form`] - the form instance tying it all together

#[macro_use]
extern crate log;

/// Live controls.
pub mod control;
/// Per-form compilation context, data map and value coercion.
pub mod data;
pub mod error;
pub mod form;
pub mod layout;
pub mod mutate;
pub mod notify;
pub mod options;
pub mod pointer;
/// Typed entry points built on `schemars`.
pub mod run;
pub mod schema;
pub mod sync;
pub mod template;
pub mod validator;

pub use data::{FormCompilationContext, FormInput};
pub use error::{FormError, Result};
pub use form::FormInstance;
pub use layout::{BuiltinWidgets, LayoutNode, WidgetHandle, WidgetKind, WidgetRegistry};
pub use options::{FormOptions, Policy, WidgetOptions};
pub use run::{form_for, load, save, schema_for};
pub use serde_json::Value;
pub use sync::{ErrorMap, ROOT_ERROR_KEY, ValidationResult};
pub use validator::{CompiledValidator, DEFAULT_VALIDATOR, ValidatorCompiler, ValidatorError, ValidatorRegistry};
