//! Per-control validators derived from schema keywords.
//!
//! Each control carries a [`ValidatorSet`]: the named validators for the
//! keywords of its schema node, in a fixed order, combined as a
//! short-circuiting conjunction. Every validator except `required` accepts
//! an empty value; emptiness is the business of `required` alone.
//!
//! The same machinery answers "does this value match that schema" for
//! combinator branch selection ([`schema_matches`]).

use std::{
    net::{Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use crate::{
    data::coerce::{self, is_empty},
    schema::{self, CombinatorKind, ResolvedSchema, SchemaType},
};

/// A `pattern` keyword with its compiled regex.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: &str) -> Self {
        let regex = match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!("pattern {source:?} does not compile, ignoring it: {err}");
                None
            }
        };
        Self {
            source: source.to_string(),
            regex,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn is_match(&self, s: &str) -> bool {
        self.regex.as_ref().is_none_or(|re| re.is_match(s))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// One schema keyword turned into a check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", content = "param", rename_all = "camelCase")]
pub enum NamedValidator {
    Required,
    Type(Vec<SchemaType>),
    Const(Value),
    Enum(Vec<Value>),
    MinLength(u64),
    MaxLength(u64),
    Pattern(Pattern),
    Format(String),
    Minimum(f64),
    ExclusiveMinimum(f64),
    Maximum(f64),
    ExclusiveMaximum(f64),
    MultipleOf(f64),
    MinItems(u64),
    MaxItems(u64),
    UniqueItems,
    MinProperties(u64),
    MaxProperties(u64),
}

/// A failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    /// Keyword of the validator that failed.
    pub keyword: &'static str,
    /// Human readable explanation.
    pub message: String,
    /// The validator parameter, for message templates.
    pub params: Value,
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

static DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("format regex"));
static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$").expect("format regex")
});
static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|z|[+-]\d{2}:\d{2})?$")
        .expect("format regex")
});
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("format regex"));
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("format regex")
});
static URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:[^\s]*$").expect("format regex"));
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("format regex")
});
static COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("format regex"));

/// Check a string against a named `format`. Unknown formats pass.
pub fn check_format(format: &str, s: &str) -> bool {
    match format {
        "date" => DATE.is_match(s),
        "time" => TIME.is_match(s),
        "date-time" => DATE_TIME.is_match(s),
        "email" | "idn-email" => EMAIL.is_match(s),
        "hostname" | "idn-hostname" => HOSTNAME.is_match(s),
        "ipv4" => s.parse::<Ipv4Addr>().is_ok(),
        "ipv6" => s.parse::<Ipv6Addr>().is_ok(),
        "uri" | "url" | "iri" => URI.is_match(s),
        "uuid" => UUID.is_match(s),
        "color" => COLOR.is_match(s),
        "json-pointer" => crate::pointer::parse(s).is_ok() && !s.starts_with('#'),
        "regex" => Regex::new(s).is_ok(),
        _ => true,
    }
}

impl NamedValidator {
    /// The schema keyword this validator checks.
    pub fn keyword(&self) -> &'static str {
        match self {
            NamedValidator::Required => "required",
            NamedValidator::Type(_) => "type",
            NamedValidator::Const(_) => "const",
            NamedValidator::Enum(_) => "enum",
            NamedValidator::MinLength(_) => "minLength",
            NamedValidator::MaxLength(_) => "maxLength",
            NamedValidator::Pattern(_) => "pattern",
            NamedValidator::Format(_) => "format",
            NamedValidator::Minimum(_) => "minimum",
            NamedValidator::ExclusiveMinimum(_) => "exclusiveMinimum",
            NamedValidator::Maximum(_) => "maximum",
            NamedValidator::ExclusiveMaximum(_) => "exclusiveMaximum",
            NamedValidator::MultipleOf(_) => "multipleOf",
            NamedValidator::MinItems(_) => "minItems",
            NamedValidator::MaxItems(_) => "maxItems",
            NamedValidator::UniqueItems => "uniqueItems",
            NamedValidator::MinProperties(_) => "minProperties",
            NamedValidator::MaxProperties(_) => "maxProperties",
        }
    }

    fn fail(&self, message: String, params: Value) -> Result<(), Failure> {
        Err(Failure {
            keyword: self.keyword(),
            message,
            params,
        })
    }

    /// Run the check against a raw control value.
    pub fn validate(&self, value: &Value) -> Result<(), Failure> {
        if matches!(self, NamedValidator::Required) {
            return if is_empty(value) {
                self.fail("This field is required.".into(), Value::Null)
            } else {
                Ok(())
            };
        }
        if is_empty(value) {
            return Ok(());
        }
        let chars = value.as_str().map(|s| s.chars().count() as u64);
        let number = number_of(value);
        match self {
            NamedValidator::Required => Ok(()),
            NamedValidator::Type(types) => {
                if coerce::to_schema_type(value, types).is_some() {
                    Ok(())
                } else {
                    let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                    self.fail(format!("Must be of type {}.", names.join(" or ")), json!(names))
                }
            }
            NamedValidator::Const(expected) => {
                if loosely_equal(value, expected) {
                    Ok(())
                } else {
                    self.fail(format!("Must be {expected}."), expected.clone())
                }
            }
            NamedValidator::Enum(options) => {
                if options.iter().any(|o| loosely_equal(value, o)) {
                    Ok(())
                } else {
                    self.fail("Must be one of the allowed values.".into(), Value::Array(options.clone()))
                }
            }
            NamedValidator::MinLength(min) => match chars {
                Some(n) if n < *min => self.fail(
                    format!("Must be {min} characters or longer (current length: {n})."),
                    json!(min),
                ),
                _ => Ok(()),
            },
            NamedValidator::MaxLength(max) => match chars {
                Some(n) if n > *max => self.fail(
                    format!("Must be {max} characters or shorter (current length: {n})."),
                    json!(max),
                ),
                _ => Ok(()),
            },
            NamedValidator::Pattern(pattern) => match value.as_str() {
                Some(s) if !pattern.is_match(s) => self.fail(
                    format!("Must match pattern: {}", pattern.as_str()),
                    json!(pattern.as_str()),
                ),
                _ => Ok(()),
            },
            NamedValidator::Format(format) => match value.as_str() {
                Some(s) if !check_format(format, s) => {
                    self.fail(format!("Must be a valid {format}."), json!(format))
                }
                _ => Ok(()),
            },
            NamedValidator::Minimum(min) => match number {
                Some(n) if n < *min => self.fail(format!("Must be {} or more.", fmt_num(*min)), json!(min)),
                _ => Ok(()),
            },
            NamedValidator::ExclusiveMinimum(min) => match number {
                Some(n) if n <= *min => {
                    self.fail(format!("Must be more than {}.", fmt_num(*min)), json!(min))
                }
                _ => Ok(()),
            },
            NamedValidator::Maximum(max) => match number {
                Some(n) if n > *max => self.fail(format!("Must be {} or less.", fmt_num(*max)), json!(max)),
                _ => Ok(()),
            },
            NamedValidator::ExclusiveMaximum(max) => match number {
                Some(n) if n >= *max => {
                    self.fail(format!("Must be less than {}.", fmt_num(*max)), json!(max))
                }
                _ => Ok(()),
            },
            NamedValidator::MultipleOf(step) => match number {
                Some(n) if *step > 0.0 && ((n / step).round() * step - n).abs() > 1e-9 => {
                    self.fail(format!("Must be a multiple of {}.", fmt_num(*step)), json!(step))
                }
                _ => Ok(()),
            },
            NamedValidator::MinItems(min) => match value.as_array() {
                Some(items) if (items.len() as u64) < *min => {
                    self.fail(format!("Must have {min} or more items."), json!(min))
                }
                _ => Ok(()),
            },
            NamedValidator::MaxItems(max) => match value.as_array() {
                Some(items) if items.len() as u64 > *max => {
                    self.fail(format!("Must have {max} or fewer items."), json!(max))
                }
                _ => Ok(()),
            },
            NamedValidator::UniqueItems => match value.as_array() {
                Some(items)
                    if items
                        .iter()
                        .enumerate()
                        .any(|(i, a)| items[..i].iter().any(|b| a == b)) =>
                {
                    self.fail("Items must be unique.".into(), Value::Bool(true))
                }
                _ => Ok(()),
            },
            NamedValidator::MinProperties(min) => match value.as_object() {
                Some(map) if (map.len() as u64) < *min => {
                    self.fail(format!("Must have {min} or more properties."), json!(min))
                }
                _ => Ok(()),
            },
            NamedValidator::MaxProperties(max) => match value.as_object() {
                Some(map) if map.len() as u64 > *max => {
                    self.fail(format!("Must have {max} or fewer properties."), json!(max))
                }
                _ => Ok(()),
            },
        }
    }
}

/// Equality that tolerates raw string input for numbers and booleans.
fn loosely_equal(value: &Value, expected: &Value) -> bool {
    if value == expected {
        return true;
    }
    match (value, expected) {
        (Value::String(s), Value::Number(n)) => number_of(&Value::String(s.clone())) == n.as_f64(),
        (Value::String(s), Value::Bool(b)) => s.trim() == b.to_string(),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

/// The validators of one control, applied in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidatorSet(pub Vec<NamedValidator>);

fn u64_of(schema: &Value, key: &str) -> Option<u64> {
    schema.get(key).and_then(Value::as_u64)
}

fn f64_of(schema: &Value, key: &str) -> Option<f64> {
    schema.get(key).and_then(Value::as_f64)
}

impl ValidatorSet {
    /// Derive the validators for a schema node.
    ///
    /// `required` is set when the parent lists the field in `required`.
    /// Draft-4 boolean `exclusiveMinimum`/`exclusiveMaximum` turn the
    /// matching bound exclusive.
    pub fn from_schema(schema: &Value, required: bool) -> Self {
        let mut out = Vec::new();
        if required {
            out.push(NamedValidator::Required);
        }
        if schema.get("type").is_some() {
            let types = schema::schema_types(schema);
            if !types.is_empty() {
                out.push(NamedValidator::Type(types));
            }
        }
        if let Some(value) = schema.get("const") {
            out.push(NamedValidator::Const(value.clone()));
        }
        if let Some(options) = schema.get("enum").and_then(Value::as_array) {
            out.push(NamedValidator::Enum(options.clone()));
        }
        if let Some(n) = u64_of(schema, "minLength") {
            out.push(NamedValidator::MinLength(n));
        }
        if let Some(n) = u64_of(schema, "maxLength") {
            out.push(NamedValidator::MaxLength(n));
        }
        if let Some(source) = schema.get("pattern").and_then(Value::as_str) {
            out.push(NamedValidator::Pattern(Pattern::new(source)));
        }
        if let Some(format) = schema.get("format").and_then(Value::as_str) {
            out.push(NamedValidator::Format(format.to_string()));
        }
        let draft4_min = schema.get("exclusiveMinimum") == Some(&Value::Bool(true));
        let draft4_max = schema.get("exclusiveMaximum") == Some(&Value::Bool(true));
        if let Some(n) = f64_of(schema, "minimum") {
            out.push(if draft4_min {
                NamedValidator::ExclusiveMinimum(n)
            } else {
                NamedValidator::Minimum(n)
            });
        }
        if let Some(n) = f64_of(schema, "exclusiveMinimum") {
            out.push(NamedValidator::ExclusiveMinimum(n));
        }
        if let Some(n) = f64_of(schema, "maximum") {
            out.push(if draft4_max {
                NamedValidator::ExclusiveMaximum(n)
            } else {
                NamedValidator::Maximum(n)
            });
        }
        if let Some(n) = f64_of(schema, "exclusiveMaximum") {
            out.push(NamedValidator::ExclusiveMaximum(n));
        }
        if let Some(n) = f64_of(schema, "multipleOf") {
            out.push(NamedValidator::MultipleOf(n));
        }
        if let Some(n) = u64_of(schema, "minItems") {
            out.push(NamedValidator::MinItems(n));
        }
        if let Some(n) = u64_of(schema, "maxItems") {
            out.push(NamedValidator::MaxItems(n));
        }
        if schema.get("uniqueItems") == Some(&Value::Bool(true)) {
            out.push(NamedValidator::UniqueItems);
        }
        if let Some(n) = u64_of(schema, "minProperties") {
            out.push(NamedValidator::MinProperties(n));
        }
        if let Some(n) = u64_of(schema, "maxProperties") {
            out.push(NamedValidator::MaxProperties(n));
        }
        Self(out)
    }

    /// Run the validators in order, stopping at the first failure.
    pub fn validate(&self, value: &Value) -> Result<(), Failure> {
        self.0.iter().try_for_each(|v| v.validate(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keywords of the validators, in order.
    pub fn keywords(&self) -> Vec<&'static str> {
        self.0.iter().map(NamedValidator::keyword).collect()
    }

    pub fn is_required(&self) -> bool {
        self.0.contains(&NamedValidator::Required)
    }
}

/// Whether `value` is an instance of `schema`.
///
/// Used to pick combinator branches, so it is lenient where the live form is
/// lenient: raw strings are accepted for numbers and booleans and
/// unsupported keywords are ignored. Recursive `$ref` placeholders are
/// followed through the reference library.
pub fn schema_matches(schema: &Value, value: &Value, resolved: &ResolvedSchema) -> bool {
    matches_depth(schema, value, resolved, 0)
}

fn matches_depth(schema: &Value, value: &Value, resolved: &ResolvedSchema, depth: usize) -> bool {
    if depth > 64 {
        warn!("schema match gave up after {depth} nested schemas");
        return false;
    }
    let schema = match schema::placeholder_target(schema) {
        Some(target) => match resolved.subschema(&target) {
            Some(target) => target,
            None => return true,
        },
        None => schema,
    };
    match schema {
        Value::Bool(b) => return *b,
        Value::Object(_) => {}
        _ => return true,
    }
    if ValidatorSet::from_schema(schema, false).validate(value).is_err() {
        return false;
    }
    if let Value::Object(data) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array)
            && required
                .iter()
                .filter_map(Value::as_str)
                .any(|key| data.get(key).is_none_or(is_empty))
        {
            return false;
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (key, sub) in properties {
                if let Some(item) = data.get(key)
                    && !matches_depth(sub, item, resolved, depth + 1)
                {
                    return false;
                }
            }
        }
        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            let known = schema::property_names(schema);
            if data.keys().any(|k| !known.contains(k)) {
                return false;
            }
        }
    }
    if let Value::Array(items) = value {
        match schema.get("items") {
            Some(Value::Array(tuple)) => {
                for (sub, item) in tuple.iter().zip(items) {
                    if !matches_depth(sub, item, resolved, depth + 1) {
                        return false;
                    }
                }
            }
            Some(sub) => {
                if !items.iter().all(|item| matches_depth(sub, item, resolved, depth + 1)) {
                    return false;
                }
            }
            None => {}
        }
    }
    for kind in schema::combinators(schema) {
        let branches = schema::branches(schema, kind, "");
        let ok = match kind {
            CombinatorKind::AllOf => branches
                .iter()
                .all(|b| matches_depth(b.schema, value, resolved, depth + 1)),
            CombinatorKind::AnyOf => branches
                .iter()
                .any(|b| matches_depth(b.schema, value, resolved, depth + 1)),
            CombinatorKind::OneOf => {
                branches
                    .iter()
                    .filter(|b| matches_depth(b.schema, value, resolved, depth + 1))
                    .count()
                    == 1
            }
            CombinatorKind::IfThenElse => {
                let condition = schema
                    .get("if")
                    .is_none_or(|cond| matches_depth(cond, value, resolved, depth + 1));
                let key = if condition { "then" } else { "else" };
                schema
                    .get(key)
                    .is_none_or(|b| matches_depth(b, value, resolved, depth + 1))
            }
        };
        if !ok {
            return false;
        }
    }
    if let Some(not) = schema.get("not")
        && matches_depth(not, value, resolved, depth + 1)
    {
        return false;
    }
    true
}

/// Indices of the active branches of `owner`'s `kind` combinator for
/// `candidate`.
///
/// `allOf` activates every branch and `if/then/else` the one picked by `if`.
/// `anyOf` activates every matching branch, `oneOf` exactly one: a unique
/// match wins, otherwise the first of `preferred` among the matches, then
/// the lowest matching index. When nothing matches, the first of
/// `preferred` (or branch 0) stays active so the form keeps its fields.
pub fn select_branches(
    kind: CombinatorKind,
    owner: &Value,
    candidate: &Value,
    resolved: &ResolvedSchema,
    preferred: &[usize],
) -> Vec<usize> {
    let branches = schema::branches(owner, kind, "");
    let Some(first) = branches.first().map(|b| b.index) else {
        return Vec::new();
    };
    let fallback = preferred
        .iter()
        .copied()
        .find(|p| branches.iter().any(|b| b.index == *p))
        .unwrap_or(first);
    let matching = || -> Vec<usize> {
        branches
            .iter()
            .filter(|b| schema_matches(b.schema, candidate, resolved))
            .map(|b| b.index)
            .collect()
    };
    match kind {
        CombinatorKind::AllOf => branches.iter().map(|b| b.index).collect(),
        CombinatorKind::IfThenElse => {
            let condition = owner
                .get("if")
                .is_none_or(|cond| schema_matches(cond, candidate, resolved));
            let wanted = if condition { 0 } else { 1 };
            branches
                .iter()
                .filter(|b| b.index == wanted)
                .map(|b| b.index)
                .collect()
        }
        CombinatorKind::AnyOf => {
            let matching = matching();
            if matching.is_empty() { vec![fallback] } else { matching }
        }
        CombinatorKind::OneOf => match matching().as_slice() {
            [] => vec![fallback],
            [only] => vec![*only],
            many => vec![
                preferred
                    .iter()
                    .copied()
                    .find(|p| many.contains(p))
                    .unwrap_or(many[0]),
            ],
        },
    }
}
