//! Form data plumbing.
//!
//! - [`coerce`] - reconciling raw values with declared schema types
//! - [`data_map`] - per-field facts keyed by generic data pointer
//! - [`context`] - the per-form compilation context and file loading

/// Value coercion against schema types.
pub mod coerce;

/// Per-form compilation context.
pub mod context;

/// The data map.
pub mod data_map;

pub use context::{FormCompilationContext, FormInput, default_schema_path, load_value};
pub use data_map::{DataMap, DataMapEntry};
