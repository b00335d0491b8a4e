//! Conversion of raw control values into their declared schema types.
//!
//! Controls hold whatever the rendering layer hands them: numbers typed into
//! text boxes arrive as strings, checkboxes may report `"true"`. Before data
//! reaches the validator every leaf is coerced to the type its schema
//! declares; values that cannot be reconciled are reported as
//! [`FormError::TypeMismatch`].

use serde_json::{Number, Value};

use crate::{error::FormError, schema::SchemaType};

/// Whether a value counts as "not filled in".
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Whether `value` already is a valid instance of `ty`.
pub fn fits(value: &Value, ty: SchemaType) -> bool {
    match (ty, value) {
        (SchemaType::String, Value::String(_))
        | (SchemaType::Boolean, Value::Bool(_))
        | (SchemaType::Null, Value::Null)
        | (SchemaType::Object, Value::Object(_))
        | (SchemaType::Array, Value::Array(_))
        | (SchemaType::Number, Value::Number(_)) => true,
        (SchemaType::Integer, Value::Number(n)) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn integer_from_f64(f: f64) -> Option<Value> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15)
        .then(|| Value::Number(Number::from(f as i64)))
}

fn number_from_str(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(Number::from(i)));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Convert `value` into an instance of `ty`.
///
/// # Errors
///
/// Returns [`FormError::TypeMismatch`] when no sensible conversion exists.
pub fn coerce(value: &Value, ty: SchemaType, path: &str) -> Result<Value, FormError> {
    if fits(value, ty) && ty != SchemaType::Integer {
        return Ok(value.clone());
    }
    let converted = match (ty, value) {
        (SchemaType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (SchemaType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (SchemaType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Some(value.clone())
            } else {
                n.as_f64().and_then(integer_from_f64)
            }
        }
        (SchemaType::Integer, Value::String(s)) => match number_from_str(s) {
            Some(Value::Number(n)) if n.is_i64() => Some(Value::Number(n)),
            Some(Value::Number(n)) => n.as_f64().and_then(integer_from_f64),
            _ => None,
        },
        (SchemaType::Number, Value::String(s)) => number_from_str(s),
        (SchemaType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "off" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (SchemaType::Boolean, Value::Number(n)) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(Value::Bool(true)),
            Some(f) if f == 0.0 => Some(Value::Bool(false)),
            _ => None,
        },
        (SchemaType::Null, Value::String(s)) if s.is_empty() => Some(Value::Null),
        _ => None,
    };
    converted.ok_or_else(|| FormError::mismatch(path, ty.as_str(), value))
}

/// Convert `value` into the first of `types` it can represent.
///
/// A value that already fits one of the types is kept as is; otherwise the
/// conversions are tried in declaration order.
pub fn to_schema_type(value: &Value, types: &[SchemaType]) -> Option<Value> {
    if types.is_empty() {
        return Some(value.clone());
    }
    if let Some(ty) = types.iter().find(|t| fits(value, **t)) {
        return coerce(value, *ty, "").ok();
    }
    types.iter().find_map(|ty| coerce(value, *ty, "").ok())
}
