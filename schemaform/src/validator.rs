//! The external validator contract.
//!
//! Whole-form validation is delegated to a JSON Schema engine behind
//! [`ValidatorCompiler`]. Engines are synchronous; a host wrapping an
//! asynchronous engine has to resolve the result before returning from
//! [`CompiledValidator::validate`].

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{FormError, Result};

/// Name of the instance the synchronization engine validates with.
pub const DEFAULT_VALIDATOR: &str = "default";

/// One error reported by a validator engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorError {
    /// Data pointer of the failing instance.
    pub instance_pointer: String,
    pub message: String,
    /// Schema keyword that failed (`required`, `minLength`, ...).
    pub keyword: String,
    /// Keyword specific details, e.g. `missingProperty` for `required`.
    pub params: Map<String, Value>,
}

/// A schema compiled by an engine.
pub trait CompiledValidator {
    /// Validate `data`, keeping the errors for [`CompiledValidator::errors`].
    fn validate(&mut self, data: &Value) -> bool;

    /// Errors of the last validation.
    fn errors(&self) -> &[ValidatorError];
}

/// A validator engine.
pub trait ValidatorCompiler {
    /// Compile `schema`, or explain why it cannot be compiled.
    fn compile(&self, schema: &Value) -> std::result::Result<Box<dyn CompiledValidator>, String>;
}

/// [`ValidatorCompiler`] backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCompiler;

impl ValidatorCompiler for JsonSchemaCompiler {
    fn compile(&self, schema: &Value) -> std::result::Result<Box<dyn CompiledValidator>, String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Box::new(JsonSchemaValidator {
            validator,
            errors: Vec::new(),
        }))
    }
}

struct JsonSchemaValidator {
    validator: jsonschema::Validator,
    errors: Vec<ValidatorError>,
}

impl CompiledValidator for JsonSchemaValidator {
    fn validate(&mut self, data: &Value) -> bool {
        self.errors = self
            .validator
            .iter_errors(data)
            .map(|error| {
                let schema_path = error.schema_path.to_string();
                let keyword = schema_path.rsplit('/').next().unwrap_or_default().to_string();
                let message = error.to_string();
                let mut params = Map::new();
                if keyword == "required"
                    && let Some(name) = quoted_prefix(&message)
                {
                    params.insert("missingProperty".into(), Value::String(name.to_string()));
                }
                ValidatorError {
                    instance_pointer: error.instance_path.to_string(),
                    message,
                    keyword,
                    params,
                }
            })
            .collect();
        self.errors.is_empty()
    }

    fn errors(&self) -> &[ValidatorError] {
        &self.errors
    }
}

/// `name` out of `"name" is a required property`.
fn quoted_prefix(message: &str) -> Option<&str> {
    let rest = message.strip_prefix('"')?;
    rest.find('"').map(|end| &rest[..end])
}

/// Named compiled validators sharing one engine.
pub struct ValidatorRegistry {
    compiler: Box<dyn ValidatorCompiler>,
    instances: IndexMap<String, Box<dyn CompiledValidator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new(Box::new(JsonSchemaCompiler))
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("instances", &self.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new(compiler: Box<dyn ValidatorCompiler>) -> Self {
        Self {
            compiler,
            instances: IndexMap::new(),
        }
    }

    /// Compile `schema` and keep it under `name`.
    ///
    /// # Errors
    ///
    /// [`FormError::DuplicateValidator`] if `name` is taken,
    /// [`FormError::ValidatorCompile`] if the engine rejects the schema.
    pub fn register(&mut self, name: &str, schema: &Value) -> Result<()> {
        if self.instances.contains_key(name) {
            return Err(FormError::DuplicateValidator(name.to_string()));
        }
        let compiled = self.compiler.compile(schema).map_err(|message| FormError::ValidatorCompile {
            name: name.to_string(),
            message,
        })?;
        self.instances.insert(name.to_string(), compiled);
        debug!("validator {name:?} registered");
        Ok(())
    }

    /// Compile `schema` and swap it in under `name`.
    ///
    /// The previous instance, if any, stays in place when compilation fails.
    ///
    /// # Errors
    ///
    /// [`FormError::ValidatorCompile`] if the engine rejects the schema.
    pub fn replace(&mut self, name: &str, schema: &Value) -> Result<()> {
        let compiled = self.compiler.compile(schema).map_err(|message| FormError::ValidatorCompile {
            name: name.to_string(),
            message,
        })?;
        self.instances.insert(name.to_string(), compiled);
        debug!("validator {name:?} replaced");
        Ok(())
    }

    /// Drop the instance `name`. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.instances.shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Validate `data` with the instance `name`.
    pub fn validate(&mut self, name: &str, data: &Value) -> Result<bool> {
        let instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| FormError::UnknownValidator(name.to_string()))?;
        Ok(instance.validate(data))
    }

    /// Errors of the last validation by `name`.
    pub fn errors(&self, name: &str) -> Result<&[ValidatorError]> {
        self.instances
            .get(name)
            .map(|v| v.errors())
            .ok_or_else(|| FormError::UnknownValidator(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string", "minLength": 2}}
        })
    }

    #[test]
    fn test_jsonschema_errors() {
        let mut registry = ValidatorRegistry::default();
        registry.register(DEFAULT_VALIDATOR, &person()).unwrap();

        assert!(!registry.validate(DEFAULT_VALIDATOR, &json!({})).unwrap());
        let errors = registry.errors(DEFAULT_VALIDATOR).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].keyword, "required");
        assert_eq!(errors[0].instance_pointer, "");
        assert_eq!(errors[0].params["missingProperty"], json!("name"));

        assert!(!registry.validate(DEFAULT_VALIDATOR, &json!({"name": "x"})).unwrap());
        let errors = registry.errors(DEFAULT_VALIDATOR).unwrap();
        assert_eq!(errors[0].keyword, "minLength");
        assert_eq!(errors[0].instance_pointer, "/name");

        assert!(registry.validate(DEFAULT_VALIDATOR, &json!({"name": "xy"})).unwrap());
        assert!(registry.errors(DEFAULT_VALIDATOR).unwrap().is_empty());
    }

    #[test]
    fn test_registry_contract() {
        let mut registry = ValidatorRegistry::default();
        registry.register("a", &json!({})).unwrap();
        assert!(matches!(
            registry.register("a", &json!({})),
            Err(FormError::DuplicateValidator(name)) if name == "a"
        ));
        assert!(matches!(
            registry.validate("b", &json!(1)),
            Err(FormError::UnknownValidator(_))
        ));
        assert!(matches!(
            registry.register("bad", &json!({"type": 12})),
            Err(FormError::ValidatorCompile { .. })
        ));
        assert!(registry.remove("a"));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_replace_keeps_old_instance_on_failure() {
        let mut registry = ValidatorRegistry::default();
        registry.replace(DEFAULT_VALIDATOR, &person()).unwrap();
        assert!(matches!(
            registry.replace(DEFAULT_VALIDATOR, &json!({"type": 12})),
            Err(FormError::ValidatorCompile { .. })
        ));
        assert!(!registry.validate(DEFAULT_VALIDATOR, &json!({})).unwrap());

        registry.replace(DEFAULT_VALIDATOR, &json!({})).unwrap();
        assert!(registry.validate(DEFAULT_VALIDATOR, &json!({})).unwrap());
    }

    #[test]
    fn test_quoted_prefix() {
        assert_eq!(quoted_prefix("\"name\" is a required property"), Some("name"));
        assert_eq!(quoted_prefix("name is missing"), None);
    }
}
