use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use serde_json::{Map, Value};

use crate::{
    data::data_map::{DataMap, generic_pointer},
    error::{FormError, Result},
    layout::{
        LayoutNode, LayoutRefLibrary, WidgetRegistry,
        build::{LayoutInput, build_layout, next_node_id},
    },
    options::FormOptions,
    schema::{ResolvedSchema, resolve},
    template::{ControlTemplate, TemplateRefLibrary, build::build_template},
};

/// What the caller hands to the compiler.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    /// JSON Schema of the form.
    pub schema: Value,
    /// Optional user layout array.
    pub layout: Option<Vec<Value>>,
    /// Optional initial data.
    pub data: Option<Value>,
}

impl FormInput {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            layout: None,
            data: None,
        }
    }

    pub fn with_layout(mut self, layout: Vec<Value>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Read the inputs from `.json`/`.toml` files.
    ///
    /// A data file that does not exist yet (or is empty) leaves the form
    /// unseeded.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, unsupported extensions, malformed content and a
    /// layout file that does not hold an array.
    pub fn load(schema: &Path, layout: Option<&Path>, data: Option<&Path>) -> anyhow::Result<Self> {
        if !schema.exists() {
            bail!("Schema file does not exist: {}", schema.display());
        }
        let mut input = FormInput::new(load_value(schema)?);
        if let Some(path) = layout {
            match load_value(path)? {
                Value::Array(elements) => input.layout = Some(elements),
                other => bail!("layout {} must be an array, got {other}", path.display()),
            }
        }
        if let Some(path) = data {
            if path.exists() {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                if !content.trim().is_empty() {
                    input.data = Some(parse_value(&content, extension(path))?);
                }
            } else {
                debug!("data file {} does not exist, starting empty", path.display());
            }
        }
        Ok(input)
    }
}

/// Everything compiled for one form.
///
/// Built once per (schema, layout, options) and owned by the form instance;
/// mutations update the data map, the libraries and the layout in place.
#[derive(Debug)]
pub struct FormCompilationContext {
    /// The schema as given.
    pub schema: Value,
    /// The user layout as given.
    pub layout_input: Option<Vec<Value>>,
    /// The initial data as given.
    pub data: Option<Value>,
    pub options: FormOptions,
    pub resolved: ResolvedSchema,
    pub data_map: DataMap,
    /// Root control template, `None` for a `false` root.
    pub template: Option<ControlTemplate>,
    pub template_library: TemplateRefLibrary,
    pub layout: LayoutNode,
    pub layout_library: LayoutRefLibrary,
    /// Structural problems found while compiling.
    pub diagnostics: Vec<FormError>,
    pub next_layout_id: u64,
}

impl FormCompilationContext {
    /// Compile `input` into templates, the data map and the layout.
    ///
    /// Structural problems are logged and kept in `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::InvalidSchema`] when the root schema is neither an
    /// object nor `true`.
    pub fn compile(input: FormInput, options: FormOptions, widgets: &dyn WidgetRegistry) -> Result<Self> {
        let schema = match input.schema {
            Value::Bool(true) => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(FormError::InvalidSchema(format!(
                    "expected an object or `true`, got {other}"
                )));
            }
        };

        let mut resolved = resolve(&schema);
        let mut diagnostics = std::mem::take(&mut resolved.diagnostics);
        let mut data_map = DataMap::new();
        let built = build_template(&resolved, &options, input.data.as_ref(), &mut data_map);
        diagnostics.extend(built.diagnostics);
        let mut template = built.root;

        let layout_input = LayoutInput {
            resolved: &resolved,
            options: &options,
            user_layout: input.layout.as_deref(),
            data: input.data.as_ref(),
            widgets,
        };
        let layout = build_layout(layout_input, &mut data_map, template.as_mut());
        diagnostics.extend(layout.diagnostics);
        if !diagnostics.is_empty() {
            warn!("form compiled with {} diagnostics", diagnostics.len());
        }

        Ok(Self {
            schema,
            layout_input: input.layout,
            data: input.data,
            options,
            resolved,
            data_map,
            template,
            template_library: built.library,
            layout: layout.root,
            layout_library: layout.library,
            diagnostics,
            next_layout_id: layout.next_id,
        })
    }

    /// Generic pointer of an indexed data pointer.
    pub fn generic_pointer(&self, indexed: &str) -> String {
        generic_pointer(indexed, &self.resolved.recursive_refs, &self.resolved.array_map)
    }

    /// A fresh layout node id.
    pub fn next_layout_id(&mut self) -> String {
        next_node_id(&mut self.next_layout_id)
    }

    /// Whether the caller supplied initial data.
    pub fn has_external_data(&self) -> bool {
        self.data.is_some()
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|s| s.to_str()).unwrap_or("")
}

/// Parse `content` as JSON or TOML according to `ext`.
///
/// # Errors
///
/// Fails on malformed content and unsupported extensions.
pub fn parse_value(content: &str, ext: &str) -> anyhow::Result<Value> {
    Ok(match ext {
        "json" => serde_json::from_str(content)?,
        "toml" | "tml" => {
            let v: toml::Value = toml::from_str(content)?;
            serde_json::to_value(v)?
        }
        _ => bail!("Unsupported file extension: {ext:?}"),
    })
}

/// Read a `.json` or `.toml` file into a JSON value.
///
/// # Errors
///
/// Fails on I/O errors, unsupported extensions and malformed content.
pub fn load_value(path: &Path) -> anyhow::Result<Value> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_value(&content, extension(path)).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Schema path conventionally paired with a data file
/// (`config.toml` → `config-schema.json`).
pub fn default_schema_path(data: &Path) -> PathBuf {
    let file_name = data
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name_split = file_name.split('.').collect::<Vec<_>>();
    if name_split.len() > 1 {
        name_split.pop();
    }
    let name = format!("{}-schema.json", name_split.join("."));

    match data.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BuiltinWidgets;
    use serde_json::json;

    #[test]
    fn test_schema_default() {
        let schema_path = default_schema_path(Path::new("config.toml"));
        assert_eq!(schema_path, PathBuf::from("config-schema.json"));
        let nested = default_schema_path(Path::new("conf/board.v2.json"));
        assert_eq!(nested, PathBuf::from("conf/board.v2-schema.json"));
    }

    #[test]
    fn test_parse_by_extension() {
        let toml = parse_value("name = \"x\"\n[net]\nport = 80\n", "toml").unwrap();
        assert_eq!(toml, json!({"name": "x", "net": {"port": 80}}));
        assert!(parse_value("{}", "yaml").is_err());
    }

    #[test]
    fn test_compile_rejects_bad_root() {
        let widgets = BuiltinWidgets::new();
        let err = FormCompilationContext::compile(FormInput::new(json!(false)), FormOptions::default(), &widgets);
        assert!(matches!(err, Err(FormError::InvalidSchema(_))));

        let ctx = FormCompilationContext::compile(FormInput::new(json!(true)), FormOptions::default(), &widgets)
            .unwrap();
        assert_eq!(ctx.schema, json!({}));
        assert!(!ctx.has_external_data());
    }

    #[test]
    fn test_compile_collects_diagnostics() {
        let widgets = BuiltinWidgets::new();
        let input = FormInput::new(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"$ref": "#/definitions/missing"}}
        }))
        .with_layout(vec![json!("a"), json!("nope")]);
        let ctx = FormCompilationContext::compile(input, FormOptions::default(), &widgets).unwrap();
        assert_eq!(ctx.diagnostics.len(), 2);
        assert_eq!(ctx.layout.items.len(), 1);
        assert_eq!(ctx.generic_pointer("/a"), "/a");
    }
}
