//! The form instance: compilation, live controls and synchronization behind
//! one handle.
//!
//! ```rust
//! use schemaform::{FormInput, FormInstance, FormOptions};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "required": ["name"],
//!     "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
//! });
//! let mut form = FormInstance::new(FormInput::new(schema), FormOptions::default());
//! form.initialize().unwrap();
//! assert!(!form.is_valid());
//!
//! form.set_value("/name", json!("Ada")).unwrap();
//! form.set_value("/age", json!("36")).unwrap();
//! assert!(form.is_valid());
//! assert_eq!(form.data(), Some(&json!({"name": "Ada", "age": 36})));
//! ```

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    control::ControlTree,
    data::{FormCompilationContext, FormInput, coerce},
    error::{FormError, Result},
    layout::{BuiltinWidgets, Condition, LayoutNode, WidgetRegistry},
    mutate::Mutator,
    notify::SubscriptionId,
    options::FormOptions,
    pointer,
    sync::{ErrorMap, Lifecycle, SyncEngine, ValidationResult},
    template::validators::schema_matches,
    validator::{DEFAULT_VALIDATOR, ValidatorCompiler, ValidatorRegistry},
};

/// A compiled, live form.
pub struct FormInstance {
    input: FormInput,
    options: FormOptions,
    widgets: Box<dyn WidgetRegistry>,
    validators: ValidatorRegistry,
    ctx: Option<FormCompilationContext>,
    tree: ControlTree,
    engine: SyncEngine,
}

impl std::fmt::Debug for FormInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormInstance")
            .field("lifecycle", &self.engine.lifecycle())
            .field("controls", &self.tree.len())
            .field("validators", &self.validators)
            .finish()
    }
}

impl FormInstance {
    /// An uninitialized form using the built-in widgets and the
    /// `jsonschema` validator.
    pub fn new(input: FormInput, options: FormOptions) -> Self {
        Self {
            input,
            options,
            widgets: Box::new(BuiltinWidgets::new()),
            validators: ValidatorRegistry::default(),
            ctx: None,
            tree: ControlTree::new(),
            engine: SyncEngine::new(),
        }
    }

    pub fn with_widgets(mut self, widgets: impl WidgetRegistry + 'static) -> Self {
        self.widgets = Box::new(widgets);
        self
    }

    pub fn with_validator(mut self, compiler: Box<dyn ValidatorCompiler>) -> Self {
        self.validators = ValidatorRegistry::new(compiler);
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.engine.lifecycle()
    }

    /// Compile the form, materialize its controls and run the first pass.
    ///
    /// # Errors
    ///
    /// [`FormError::Destroyed`] after [`FormInstance::destroy`], schema and
    /// validator compilation errors otherwise.
    pub fn initialize(&mut self) -> Result<&ValidationResult> {
        if self.engine.lifecycle() == Lifecycle::Destroyed {
            return Err(FormError::Destroyed);
        }
        let ctx = FormCompilationContext::compile(self.input.clone(), self.options.clone(), self.widgets.as_ref())?;
        self.validators.replace(DEFAULT_VALIDATOR, &ctx.schema)?;
        self.tree = ControlTree::from_context(&ctx);
        self.ctx = Some(ctx);
        self.engine.activate()?;
        self.engine.reset();
        info!("form initialized with {} controls", self.tree.len());
        self.sync()
    }

    /// Replace the inputs and options and initialize again.
    ///
    /// Subscriptions to the form channels survive; the controls are new.
    /// When compilation fails the previous controls and validator stay in
    /// use.
    pub fn rebuild(&mut self, input: FormInput, options: FormOptions) -> Result<&ValidationResult> {
        self.input = input;
        self.options = options;
        self.initialize()
    }

    fn sync(&mut self) -> Result<&ValidationResult> {
        let ctx = self.ctx.as_mut().ok_or(FormError::NotInitialized)?;
        let raw = self.tree.root().map_or(Value::Null, |root| self.tree.value(root));
        self.engine
            .pass(&raw, &ctx.resolved, &mut ctx.data_map, &ctx.options, &mut self.validators)
    }

    fn check_active(&self, op: &str) -> bool {
        match self.engine.lifecycle() {
            Lifecycle::Active => true,
            state => {
                warn!("{op}: form is {state:?}");
                false
            }
        }
    }

    /// Set the raw value of the control at `data_pointer` and synchronize.
    ///
    /// # Errors
    ///
    /// [`FormError::NodeNotFound`] for unknown pointers and lifecycle errors.
    pub fn set_value(&mut self, data_pointer: &str, value: Value) -> Result<&ValidationResult> {
        match self.engine.lifecycle() {
            Lifecycle::Uninitialized => return Err(FormError::NotInitialized),
            Lifecycle::Destroyed => return Err(FormError::Destroyed),
            Lifecycle::Active => {}
        }
        pointer::parse(data_pointer)?;
        let id = self
            .tree
            .get(data_pointer)
            .ok_or_else(|| FormError::NodeNotFound(data_pointer.to_string()))?;
        self.tree.set_value(id, value);
        self.sync()
    }

    /// Raw (unformatted) value of the control at `data_pointer`.
    pub fn raw_value(&self, data_pointer: &str) -> Option<Value> {
        self.tree.get(data_pointer).map(|id| self.tree.value(id))
    }

    /// Result of the latest pass.
    pub fn result(&self) -> Option<&ValidationResult> {
        self.engine.last()
    }

    /// Formatted data of the latest pass.
    pub fn data(&self) -> Option<&Value> {
        self.result().map(|r| &r.data)
    }

    pub fn is_valid(&self) -> bool {
        self.result().is_some_and(|r| r.is_valid)
    }

    pub fn errors(&self) -> Option<&ErrorMap> {
        self.result().map(|r| &r.messages)
    }

    pub fn context(&self) -> Option<&FormCompilationContext> {
        self.ctx.as_ref()
    }

    pub fn layout(&self) -> Option<&LayoutNode> {
        self.ctx.as_ref().map(|c| &c.layout)
    }

    pub fn tree(&self) -> &ControlTree {
        &self.tree
    }

    /// Formatted data converted into `C`.
    ///
    /// # Errors
    ///
    /// Fails before the first pass and when the data does not fit `C`.
    pub fn typed_value<C: DeserializeOwned>(&self) -> anyhow::Result<C> {
        let data = self.data().context("form has no data yet")?;
        serde_json::from_value(data.clone()).context("form data does not match the target type")
    }

    pub fn subscribe_data(&mut self, callback: impl FnMut(&Value) + 'static) -> Result<SubscriptionId> {
        self.subscribable()?;
        Ok(self.engine.data_changes.subscribe(callback))
    }

    pub fn subscribe_validity(&mut self, callback: impl FnMut(&bool) + 'static) -> Result<SubscriptionId> {
        self.subscribable()?;
        Ok(self.engine.validity_changes.subscribe(callback))
    }

    pub fn subscribe_errors(&mut self, callback: impl FnMut(&ErrorMap) + 'static) -> Result<SubscriptionId> {
        self.subscribable()?;
        Ok(self.engine.error_changes.subscribe(callback))
    }

    fn subscribable(&self) -> Result<()> {
        match self.engine.lifecycle() {
            Lifecycle::Destroyed => Err(FormError::Destroyed),
            _ => Ok(()),
        }
    }

    /// Release a subscription made on any of the form channels.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.engine.data_changes.unsubscribe(id)
            || self.engine.validity_changes.unsubscribe(id)
            || self.engine.error_changes.unsubscribe(id)
    }

    /// Drop every subscription; later calls fail.
    pub fn destroy(&mut self) {
        self.engine.destroy();
        self.tree.clear_subscriptions();
        info!("form destroyed");
    }

    /// Whether the form may be submitted now.
    pub fn can_submit(&self) -> bool {
        self.engine.lifecycle() == Lifecycle::Active && (self.is_valid() || !self.options.disable_invalid_submit)
    }

    /// Whether the errors of the control at `data_pointer` should be shown.
    pub fn show_errors_for(&self, data_pointer: &str) -> bool {
        let Some(node) = self.tree.get(data_pointer).and_then(|id| self.tree.node(id)) else {
            return false;
        };
        let has_value = self.raw_value(data_pointer).is_some_and(|v| !coerce::is_empty(&v));
        self.options.validate_on_render.shows_errors(node.dirty, has_value)
    }

    /// Whether a node carrying `condition` at `data_pointer` is visible.
    ///
    /// The `if` schema is matched against the data of the level the node
    /// belongs to.
    pub fn evaluate_condition(&self, condition: &Condition, data_pointer: &str) -> bool {
        let Some(ctx) = &self.ctx else {
            return false;
        };
        let level = pointer::parent(data_pointer).unwrap_or_default();
        let value = self.raw_value(&level).unwrap_or(Value::Null);
        let matched = ctx
            .resolved
            .subschema(&condition.if_pointer)
            .is_none_or(|schema| schema_matches(schema, &value, &ctx.resolved));
        matched != condition.negate
    }

    fn mutate(&mut self, op: &str, f: impl FnOnce(&mut Mutator<'_>) -> bool) -> bool {
        if !self.check_active(op) {
            return false;
        }
        let Some(ctx) = self.ctx.as_mut() else {
            return false;
        };
        let mut mutator = Mutator {
            tree: &mut self.tree,
            layout: &mut ctx.layout,
            next_layout_id: &mut ctx.next_layout_id,
            layout_library: &ctx.layout_library,
            template_library: &ctx.template_library,
            resolved: &ctx.resolved,
            data_map: &ctx.data_map,
            widgets: self.widgets.as_ref(),
        };
        if !f(&mut mutator) {
            return false;
        }
        if let Err(err) = self.sync() {
            error!("{op}: {err}");
        }
        true
    }

    /// Append an item to the list at `target`, or expand the recursive
    /// member `key` of the group at `target`.
    pub fn add_item(&mut self, target: &str, key: Option<&str>) -> bool {
        self.mutate("add_item", |m| m.add_item(target, key))
    }

    /// Remove the list item or group member at `target`.
    pub fn remove_item(&mut self, target: &str) -> bool {
        self.mutate("remove_item", |m| m.remove_item(target))
    }

    /// Move item `from` of the list at `target` to `to`.
    pub fn move_array_item(&mut self, target: &str, from: usize, to: usize, move_layout: bool) -> bool {
        self.mutate("move_array_item", |m| m.move_array_item(target, from, to, move_layout))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::validator::{CompiledValidator, JsonSchemaCompiler};
    use serde_json::json;

    fn person() -> FormInstance {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
        });
        FormInstance::new(FormInput::new(schema), FormOptions::default())
    }

    #[test]
    fn test_lifecycle() {
        let mut form = person();
        assert!(matches!(form.set_value("/name", json!("x")), Err(FormError::NotInitialized)));
        assert!(!form.add_item("/name", None));
        form.initialize().unwrap();
        assert_eq!(form.lifecycle(), Lifecycle::Active);
        assert!(matches!(form.set_value("/nope", json!(1)), Err(FormError::NodeNotFound(_))));
        assert!(matches!(form.set_value("nope", json!(1)), Err(FormError::InvalidPointer(_))));

        form.destroy();
        assert!(matches!(form.set_value("/name", json!("x")), Err(FormError::Destroyed)));
        assert!(matches!(form.initialize(), Err(FormError::Destroyed)));
        assert!(form.subscribe_data(|_| {}).is_err());
        assert!(!form.can_submit());
    }

    #[test]
    fn test_channels() {
        let mut form = person();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        let id = form
            .subscribe_errors(move |e| sink.borrow_mut().push(e.keys().cloned().collect::<Vec<_>>()))
            .unwrap();
        form.initialize().unwrap();
        form.set_value("/age", json!("3")).unwrap();
        form.set_value("/name", json!("x")).unwrap();
        assert_eq!(*errors.borrow(), vec![vec!["/name".to_string()], vec![]]);
        assert!(form.unsubscribe(id));
        assert!(!form.unsubscribe(id));
    }

    #[test]
    fn test_submit_and_error_display() {
        let mut options = FormOptions::default();
        options.disable_invalid_submit = true;
        let schema = json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}});
        let mut form = FormInstance::new(FormInput::new(schema), options);
        form.initialize().unwrap();
        assert!(!form.can_submit());
        assert!(!form.show_errors_for("/name"));
        form.set_value("/name", json!("x")).unwrap();
        assert!(form.can_submit());
        assert!(form.show_errors_for("/name"));
    }

    #[test]
    fn test_conditions() {
        let schema = json!({
            "type": "object",
            "properties": {"kind": {"type": "string"}},
            "if": {"properties": {"kind": {"const": "a"}}},
            "then": {"properties": {"extra": {"type": "string"}}}
        });
        let mut form = FormInstance::new(FormInput::new(schema).with_data(json!({"kind": "b"})), FormOptions::default());
        form.initialize().unwrap();
        let condition = Condition {
            if_pointer: "/if".into(),
            negate: false,
        };
        assert!(!form.evaluate_condition(&condition, "/extra"));
        form.set_value("/kind", json!("a")).unwrap();
        assert!(form.evaluate_condition(&condition, "/extra"));
    }

    struct Picky;

    impl ValidatorCompiler for Picky {
        fn compile(&self, schema: &Value) -> std::result::Result<Box<dyn CompiledValidator>, String> {
            if schema.get("x-reject").is_some() {
                return Err("rejected".into());
            }
            JsonSchemaCompiler.compile(schema)
        }
    }

    #[test]
    fn test_failed_rebuild_keeps_validator() {
        let schema = json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}});
        let mut form =
            FormInstance::new(FormInput::new(schema.clone()), FormOptions::default()).with_validator(Box::new(Picky));
        form.initialize().unwrap();
        assert!(!form.is_valid());

        let mut rejected = schema;
        rejected["x-reject"] = json!(true);
        assert!(matches!(
            form.rebuild(FormInput::new(rejected), FormOptions::default()),
            Err(FormError::ValidatorCompile { .. })
        ));
        form.set_value("/name", json!("x")).unwrap();
        assert!(form.is_valid());
        form.set_value("/name", Value::Null).unwrap();
        assert!(!form.is_valid());
        assert!(form.errors().unwrap().contains_key("/name"));
    }

    #[test]
    fn test_typed_value() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Person {
            name: String,
            age: Option<i64>,
        }
        let mut form = person();
        form.initialize().unwrap();
        form.set_value("", json!({"name": "Ada", "age": "36"})).unwrap();
        let person: Person = form.typed_value().unwrap();
        assert_eq!(
            person,
            Person {
                name: "Ada".into(),
                age: Some(36)
            }
        );
    }
}
