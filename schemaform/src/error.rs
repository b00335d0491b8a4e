//! Error types shared by every stage of the compiler.
//!
//! Structural build problems (a malformed layout element, an unresolved
//! `$ref`, an unknown widget) are not returned: they are logged and recorded
//! as diagnostics while the build carries on. The variants below are the
//! contract errors that abort a single call, plus the type mismatch reported
//! (and then swallowed) by value coercion.

use thiserror::Error;

/// Errors produced while compiling or operating a form.
#[derive(Debug, Error)]
pub enum FormError {
    /// A string could not be parsed as a JSON Pointer.
    #[error("invalid JSON pointer: {0:?}")]
    InvalidPointer(String),

    /// The root schema is not usable (not an object or boolean schema).
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A `$ref` could not be resolved inside the root document.
    #[error("unresolved $ref {reference:?} at {pointer}")]
    UnresolvedReference {
        /// Schema pointer of the node carrying the `$ref`.
        pointer: String,
        /// The reference string as written in the schema.
        reference: String,
    },

    /// A user layout element could not be interpreted.
    #[error("invalid layout element at {path}: {reason}")]
    InvalidLayout {
        /// Position of the element in the user layout (`/0/items/2`).
        path: String,
        /// Why the element was rejected.
        reason: String,
    },

    /// A widget kind is not known to the widget registry.
    #[error("unknown widget kind {0:?}")]
    UnknownWidget(String),

    /// A raw value cannot be reconciled with its declared schema type.
    #[error("type mismatch at {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Data pointer of the offending value.
        path: String,
        /// Declared schema type.
        expected: String,
        /// The raw value that was rejected.
        actual: String,
    },

    /// No control exists at the given data pointer.
    #[error("no control at {0}")]
    NodeNotFound(String),

    /// The requested template is missing from the template library.
    #[error("no control template registered for {0}")]
    TemplateNotFound(String),

    /// A named validator instance was registered twice.
    #[error("validator {0:?} is already registered")]
    DuplicateValidator(String),

    /// No validator instance with that name is registered.
    #[error("validator {0:?} is not registered")]
    UnknownValidator(String),

    /// The external validator refused to compile a schema.
    #[error("validator {name:?} failed to compile: {message}")]
    ValidatorCompile {
        /// Name the instance was being registered under.
        name: String,
        /// Message reported by the validator engine.
        message: String,
    },

    /// The form has not been initialized yet.
    #[error("form is not initialized")]
    NotInitialized,

    /// The form was destroyed; no further operations are accepted.
    #[error("form has been destroyed")]
    Destroyed,

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormError>;

impl FormError {
    /// Convenience constructor for [`FormError::TypeMismatch`].
    pub fn mismatch(path: &str, expected: impl Into<String>, actual: &serde_json::Value) -> Self {
        FormError::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}
