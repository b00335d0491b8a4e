//! JSON Pointer algebra.
//!
//! Pointers are kept as RFC 6901 strings (`/a/0/b`) because they double as
//! cache keys for the data map and the reference libraries. Array segments
//! may hold a concrete index or the append marker [`APPEND`]; a pointer whose
//! list indices have been replaced by the marker is *generic* and is shared by
//! every item of the list.
//!
//! Lookups are total: a missing path yields `None` (or the caller's default)
//! instead of an error. Only malformed pointer strings are reported, and
//! those are logged as programming errors.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{FormError, Result};

/// Array segment meaning "after the last element".
pub const APPEND: &str = "-";

/// Generic array pointer → number of fixed tuple slots (0 for pure lists).
pub type ArrayMap = IndexMap<String, usize>;

/// Generic data pointer prefix → shorter prefix it recursively repeats.
pub type RecursiveRefMap = IndexMap<String, String>;

/// Escape a single key for use as a pointer segment.
pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`escape`].
pub fn unescape(key: &str) -> String {
    key.replace("~1", "/").replace("~0", "~")
}

/// Parse a pointer into its unescaped segments.
///
/// Accepts the empty pointer, `/`-prefixed pointers and URI fragment forms
/// (`#`, `#/a/b`).
///
/// # Errors
///
/// Returns [`FormError::InvalidPointer`] when the string is neither empty nor
/// starts with `/` (after an optional `#`).
pub fn parse(pointer: &str) -> Result<Vec<String>> {
    let body = pointer.strip_prefix('#').unwrap_or(pointer);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    match body.strip_prefix('/') {
        Some(rest) => Ok(rest.split('/').map(unescape).collect()),
        None => Err(FormError::InvalidPointer(pointer.to_string())),
    }
}

/// Compile segments back into a pointer string.
pub fn compile<S: AsRef<str>>(keys: &[S]) -> String {
    keys.iter()
        .map(|k| format!("/{}", escape(k.as_ref())))
        .collect()
}

/// Append one key to a pointer.
pub fn join(pointer: &str, key: &str) -> String {
    format!("{pointer}/{}", escape(key))
}

/// Data pointer of a combinator branch copied to the template root.
///
/// The branch schema pointer becomes a single segment, so `/oneOf/1`
/// reads as `/~1oneOf~11`.
pub fn branch_root_pointer(schema_pointer: &str) -> String {
    format!("/{}", escape(schema_pointer))
}

/// Append an array index to a pointer.
pub fn join_index(pointer: &str, index: usize) -> String {
    format!("{pointer}/{index}")
}

/// Pointer of the parent node, `None` for the root.
pub fn parent(pointer: &str) -> Option<String> {
    let keys = parse(pointer).ok()?;
    let (_, init) = keys.split_last()?;
    Some(compile(init))
}

/// Last (unescaped) segment of a pointer, `None` for the root.
pub fn last_key(pointer: &str) -> Option<String> {
    parse(pointer).ok()?.pop()
}

/// Whether `key` is a canonical array index.
pub fn is_index(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'))
}

/// Whether `pointer` equals `prefix` or lies underneath it.
pub fn is_sub_pointer(prefix: &str, pointer: &str) -> bool {
    match pointer.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Parse a dotted object path as written in user layouts.
///
/// `a.b[0].c[]` becomes `["a", "b", "0", "c", "-"]`; bracketed quoted keys
/// (`a["x.y"]`) keep their dots. A leading `/` switches to pointer syntax.
pub fn parse_object_path(path: &str) -> Vec<String> {
    if path.starts_with('/') {
        return parse(path).unwrap_or_default();
    }
    let mut keys = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    keys.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    keys.push(std::mem::take(&mut current));
                }
                let mut inner = String::new();
                let mut quote = None;
                for c in chars.by_ref() {
                    match (quote, c) {
                        (None, '\'' | '"') => quote = Some(c),
                        (Some(q), c) if c == q => quote = None,
                        (None, ']') => break,
                        (_, c) => inner.push(c),
                    }
                }
                keys.push(if inner.is_empty() {
                    APPEND.to_string()
                } else {
                    inner
                });
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        keys.push(current);
    }
    keys
}

/// Convert an indexed pointer into its generic form.
///
/// For every array known to `array_map`, indices inside the tuple range are
/// kept (each tuple slot has its own schema) and indices past it become
/// [`APPEND`].
pub fn to_generic(pointer: &str, array_map: &ArrayMap) -> String {
    let keys = match parse(pointer) {
        Ok(keys) => keys,
        Err(err) => {
            error!("to_generic: {err}");
            return pointer.to_string();
        }
    };
    let mut generic: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if is_index(&key)
            && let Some(&tuple) = array_map.get(&compile(&generic))
            && key.parse::<usize>().is_ok_and(|i| i >= tuple)
        {
            generic.push(APPEND.to_string());
            continue;
        }
        generic.push(key);
    }
    compile(&generic)
}

/// Convert an indexed pointer into its generic form, collapsing recursion.
///
/// Segments are converted left to right. Whenever the pointer built so far
/// is the position of a recursive reference it is replaced by the pointer it
/// repeats, so array lookups further down use the canonical prefix.
pub fn to_generic_with_recursion(
    pointer: &str,
    recursive_map: &RecursiveRefMap,
    array_map: &ArrayMap,
) -> String {
    let keys = match parse(pointer) {
        Ok(keys) => keys,
        Err(err) => {
            error!("to_generic_with_recursion: {err}");
            return pointer.to_string();
        }
    };
    let mut generic = String::new();
    for key in keys {
        let past_tuple = is_index(&key)
            && array_map
                .get(&generic)
                .is_some_and(|&tuple| key.parse::<usize>().is_ok_and(|i| i >= tuple));
        generic = join(&generic, if past_tuple { APPEND } else { key.as_str() });
        while let Some(to) = recursive_map.get(&generic).filter(|to| to.len() < generic.len()) {
            generic = to.clone();
        }
    }
    generic
}

/// Fill the [`APPEND`] segments of a generic pointer with concrete indices.
///
/// Segments are replaced left to right; surplus markers are kept.
pub fn to_indexed(generic: &str, indices: &[usize]) -> String {
    let Ok(keys) = parse(generic) else {
        error!("to_indexed: invalid pointer {generic:?}");
        return generic.to_string();
    };
    let mut indices = indices.iter();
    let keys: Vec<String> = keys
        .into_iter()
        .map(|key| {
            if key == APPEND {
                indices.next().map(|i| i.to_string()).unwrap_or(key)
            } else {
                key
            }
        })
        .collect();
    compile(&keys)
}

/// Look up the value at `pointer`.
pub fn get<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    let keys = parse(pointer).ok()?;
    keys.iter().try_fold(value, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    })
}

/// Mutable variant of [`get`].
pub fn get_mut<'a>(value: &'a mut Value, pointer: &str) -> Option<&'a mut Value> {
    let keys = parse(pointer).ok()?;
    keys.iter().try_fold(value, |node, key| match node {
        Value::Object(map) => map.get_mut(key),
        Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get_mut(i)),
        _ => None,
    })
}

/// Look up the value at `pointer`, falling back to `default`.
pub fn get_or(value: &Value, pointer: &str, default: Value) -> Value {
    get(value, pointer).cloned().unwrap_or(default)
}

/// Whether a value exists at `pointer`.
pub fn has(value: &Value, pointer: &str) -> bool {
    get(value, pointer).is_some()
}

/// Set the value at `pointer`, creating missing intermediate containers.
///
/// Array indices may address an existing element or the position right
/// after the last one. Returns `false` when the path crosses a scalar, skips
/// array positions or the pointer is invalid.
pub fn set(root: &mut Value, pointer: &str, new_value: Value) -> bool {
    write(root, pointer, new_value, false)
}

/// Like [`set`], but array targets shift existing elements to the right.
pub fn insert(root: &mut Value, pointer: &str, new_value: Value) -> bool {
    write(root, pointer, new_value, true)
}

fn write(root: &mut Value, pointer: &str, new_value: Value, insert: bool) -> bool {
    match parse(pointer) {
        Ok(keys) => write_keys(root, &keys, new_value, insert),
        Err(err) => {
            error!("pointer write: {err}");
            false
        }
    }
}

fn container_for(key: &str) -> Value {
    if key == APPEND || is_index(key) {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn write_keys(node: &mut Value, keys: &[String], new_value: Value, insert: bool) -> bool {
    let Some((key, rest)) = keys.split_first() else {
        *node = new_value;
        return true;
    };
    if node.is_null() {
        *node = container_for(key);
    }
    match node {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert(key.clone(), new_value);
                true
            } else {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                write_keys(child, rest, new_value, insert)
            }
        }
        Value::Array(arr) => {
            let idx = if key == APPEND {
                arr.len()
            } else {
                match key.parse::<usize>() {
                    Ok(idx) => idx,
                    Err(_) => return false,
                }
            };
            if idx > arr.len() {
                debug!("pointer write: index {idx} is past the end of an array of {}", arr.len());
                return false;
            }
            if rest.is_empty() && insert {
                arr.insert(idx, new_value);
                return true;
            }
            if idx == arr.len() {
                arr.push(Value::Null);
            }
            write_keys(&mut arr[idx], rest, new_value, insert)
        }
        _ => false,
    }
}

/// Remove and return the value at `pointer`.
///
/// Object keys keep the order of their siblings; array elements shift left.
pub fn remove(root: &mut Value, pointer: &str) -> Option<Value> {
    let mut keys = parse(pointer).ok()?;
    let key = keys.pop()?;
    match get_mut(root, &compile(&keys))? {
        Value::Object(map) => map.shift_remove(&key),
        Value::Array(arr) => {
            let idx = key.parse::<usize>().ok()?;
            (idx < arr.len()).then(|| arr.remove(idx))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_compile() {
        assert_eq!(parse("").unwrap(), Vec::<String>::new());
        assert_eq!(parse("#").unwrap(), Vec::<String>::new());
        assert_eq!(parse("/a~1b/c~0d/0").unwrap(), vec!["a/b", "c~d", "0"]);
        assert_eq!(parse("#/definitions/node").unwrap(), vec!["definitions", "node"]);
        assert!(parse("a/b").is_err());
        assert_eq!(compile(&["a/b", "c~d", "0"]), "/a~1b/c~0d/0");
    }

    #[test]
    fn test_parent_and_last_key() {
        assert_eq!(parent("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent("/a").as_deref(), Some(""));
        assert_eq!(parent(""), None);
        assert_eq!(last_key("/a/x~1y").as_deref(), Some("x/y"));
    }

    #[test]
    fn test_sub_pointer() {
        assert!(is_sub_pointer("", "/a"));
        assert!(is_sub_pointer("/a", "/a/b"));
        assert!(is_sub_pointer("/a", "/a"));
        assert!(!is_sub_pointer("/a", "/ab"));
    }

    #[test]
    fn test_object_path() {
        assert_eq!(parse_object_path("a.b[0].c[]"), vec!["a", "b", "0", "c", "-"]);
        assert_eq!(parse_object_path("a[\"x.y\"]"), vec!["a", "x.y"]);
        assert_eq!(parse_object_path("/a/b"), vec!["a", "b"]);
    }

    #[test]
    fn test_generic_round_trip() {
        let mut array_map = ArrayMap::new();
        array_map.insert("/list".into(), 0);
        let generic = "/list/-/name";
        for i in 0..4 {
            let indexed = to_indexed(generic, &[i]);
            assert_eq!(indexed, format!("/list/{i}/name"));
            assert_eq!(to_generic(&indexed, &array_map), generic);
        }
    }

    #[test]
    fn test_generic_keeps_tuple_slots() {
        let mut array_map = ArrayMap::new();
        array_map.insert("/pair".into(), 2);
        assert_eq!(to_generic("/pair/1", &array_map), "/pair/1");
        assert_eq!(to_generic("/pair/2", &array_map), "/pair/-");
    }

    #[test]
    fn test_generic_collapses_recursion() {
        let array_map = ArrayMap::new();
        let mut recursive = RecursiveRefMap::new();
        recursive.insert("/child".into(), "".into());
        assert_eq!(
            to_generic_with_recursion("/child/child/name", &recursive, &array_map),
            "/name"
        );

        let mut array_map = ArrayMap::new();
        array_map.insert("/tags".into(), 0);
        assert_eq!(
            to_generic_with_recursion("/child/tags/3", &recursive, &array_map),
            "/tags/-"
        );
    }

    #[test]
    fn test_get_set_insert_remove() {
        let mut data = json!({"a": [1, 2]});
        assert_eq!(get(&data, "/a/1"), Some(&json!(2)));
        assert_eq!(get(&data, "/a/-"), None);
        assert_eq!(get_or(&data, "/missing", json!("d")), json!("d"));

        assert!(set(&mut data, "/a/-", json!(3)));
        assert!(insert(&mut data, "/a/0", json!(0)));
        assert_eq!(data, json!({"a": [0, 1, 2, 3]}));

        assert!(set(&mut data, "/b/list/0/x", json!(true)));
        assert_eq!(data["b"], json!({"list": [{"x": true}]}));

        assert_eq!(remove(&mut data, "/a/0"), Some(json!(0)));
        assert_eq!(remove(&mut data, "/nope"), None);
        assert!(!set(&mut data, "/a/0/deeper", json!(1)));
    }

    #[test]
    fn test_write_past_end_is_refused() {
        let mut data = json!({"a": [1]});
        assert!(!set(&mut data, "/a/4000000000", json!(2)));
        assert!(!insert(&mut data, "/a/3", json!(2)));
        assert!(!set(&mut data, "/b/2", json!(2)));
        assert_eq!(data, json!({"a": [1], "b": []}));
        assert!(set(&mut data, "/a/1", json!(2)));
        assert_eq!(data["a"], json!([1, 2]));
    }

    #[test]
    fn test_branch_root_pointer() {
        assert_eq!(branch_root_pointer("/oneOf/1"), "/~1oneOf~11");
        assert_eq!(last_key(&branch_root_pointer("/oneOf/1")).as_deref(), Some("/oneOf/1"));
    }
}
