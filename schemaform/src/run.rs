use std::{fs, path::Path};

use anyhow::{Context, bail};
use schemars::JsonSchema;
use serde_json::Value;

use crate::{
    data::{FormInput, load_value},
    form::FormInstance,
    options::FormOptions,
};

/// JSON Schema of a typed config.
///
/// # Errors
///
/// Returns errors when the generated schema cannot be serialized.
pub fn schema_for<C: JsonSchema>() -> anyhow::Result<Value> {
    let schema = schemars::schema_for!(C);
    Ok(serde_json::to_value(&schema)?)
}

/// Build and initialize an empty form for a typed config.
///
/// # Errors
///
/// Returns errors when schema generation or form compilation fails.
pub fn form_for<C: JsonSchema>(options: FormOptions) -> anyhow::Result<FormInstance> {
    let schema = schema_for::<C>()?;
    let mut form = FormInstance::new(FormInput::new(schema), options);
    form.initialize().context("Failed to initialize form")?;
    Ok(form)
}

/// Build a form for a typed config seeded from `config_path`.
///
/// A missing or empty file leaves the form unseeded.
///
/// # Errors
///
/// Returns errors when parsing, schema generation or compilation fails.
pub fn load<C: JsonSchema>(config_path: impl AsRef<Path>, options: FormOptions) -> anyhow::Result<FormInstance> {
    let config_path = config_path.as_ref();
    let schema = schema_for::<C>()?;
    let mut input = FormInput::new(schema);

    let exists = fs::metadata(config_path).is_ok_and(|m| m.len() > 0);
    if exists {
        let data = load_value(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        input = input.with_data(data);
    }

    let mut form = FormInstance::new(input, options);
    form.initialize().context("Failed to initialize form")?;
    Ok(form)
}

/// Write the formatted data of `form` to `config_path` as JSON or TOML.
///
/// # Errors
///
/// Returns errors for forms without data, unsupported extensions and I/O
/// failures.
pub fn save(form: &FormInstance, config_path: impl AsRef<Path>) -> anyhow::Result<()> {
    let config_path = config_path.as_ref();
    let val = form.data().context("form has no data yet")?;
    let ext = config_path
        .extension()
        .map(|s| format!("{}", s.display()))
        .unwrap_or_default();

    let content = match ext.as_str() {
        "json" => serde_json::to_string_pretty(val)?,
        "toml" => toml::to_string_pretty(val)?,
        _ => {
            bail!("unsupported config file extension: {ext}",);
        }
    };
    fs::write(config_path, content).with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, JsonSchema, Serialize, Deserialize)]
    struct Board {
        name: String,
        cores: u32,
        #[serde(default)]
        features: Vec<String>,
    }

    #[test]
    fn test_load_and_save_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.toml");
        fs::write(&path, "name = \"rk3588\"\ncores = \"8\"\nfeatures = [\"smp\"]\n").unwrap();

        let form = load::<Board>(&path, FormOptions::default()).unwrap();
        let board: Board = form.typed_value().unwrap();
        assert_eq!(board.cores, 8);
        assert_eq!(board.features, vec!["smp".to_string()]);

        save(&form, &path).unwrap();
        let back: Board = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, board);
        assert!(save(&form, dir.path().join("board.yaml")).is_err());
    }

    #[test]
    fn test_missing_file_is_empty_form() {
        let dir = tempfile::tempdir().unwrap();
        let form = load::<Board>(dir.path().join("none.json"), FormOptions::default()).unwrap();
        assert!(!form.is_valid());
        assert!(form.typed_value::<Board>().is_err());
    }
}
