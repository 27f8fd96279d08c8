//! The configurator: binds class identifiers to constructors and to
//! schema-description functions, and produces validated instances on demand.
//!
//! Registration replaces load-time magic with explicit calls: each module
//! exposes a `register` function invoked from `main` (or test setup), which
//! installs the class's constructor and its expected-parameters chain in
//! base-to-derived order. Re-registration of the same pair is tolerated to
//! accommodate duplicate dynamic loading.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use schema::{AssemblyRules, Schema, Validator};
use tree::Tree;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("class '{class_id}': {detail}")]
    Parameter { class_id: String, detail: String },

    #[error("no class '{0}' is registered")]
    UnknownClass(String),

    #[error("{0}")]
    Logic(String),

    #[error("configuration rejected:\n{0}")]
    Validation(String),

    #[error(transparent)]
    Schema(#[from] schema::Error),

    #[error(transparent)]
    Tree(#[from] tree::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A schema-description function. Functions of one class id run in
/// registration order on the same schema under construction, so derived
/// declarations may append to or overwrite base declarations.
pub type SchemaFn = fn(&mut Schema) -> schema::Result<()>;

/// Constructors take the validated configuration, and optionally one extra
/// typed argument (erased here, downcast at the call site).
type Ctor<B> = Arc<dyn Fn(&Tree, Option<&dyn Any>) -> Result<Box<B>> + Send + Sync>;

struct Inner<B: ?Sized> {
    ctors: HashMap<(String, TypeId), Ctor<B>>,
    schema_fns: HashMap<String, Vec<SchemaFn>>,
    /// Class ids in first-registration order.
    order: Vec<String>,
}

/// A factory for one base type `B` (typically a trait object).
pub struct Registry<B: ?Sized> {
    inner: Mutex<Inner<B>>,
}

impl<B: ?Sized> Default for Registry<B> {
    fn default() -> Self {
        Registry {
            inner: Mutex::new(Inner {
                ctors: HashMap::new(),
                schema_fns: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }
}

impl<B: ?Sized + 'static> Registry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a constructor taking only the validated configuration.
    /// Re-registering the same `(class id, signature)` pair logs a warning
    /// and keeps the first registration.
    pub fn register_class<F>(&self, class_id: &str, ctor: F)
    where
        F: Fn(&Tree) -> Result<Box<B>> + Send + Sync + 'static,
    {
        self.install(
            class_id,
            TypeId::of::<()>(),
            Arc::new(move |config, _| ctor(config)),
        );
    }

    /// Install a constructor taking the configuration plus one extra typed
    /// argument.
    pub fn register_class_with<A, F>(&self, class_id: &str, ctor: F)
    where
        A: 'static,
        F: Fn(&Tree, &A) -> Result<Box<B>> + Send + Sync + 'static,
    {
        let class = class_id.to_string();
        self.install(
            class_id,
            TypeId::of::<A>(),
            Arc::new(move |config, arg| {
                let arg = arg
                    .and_then(|a| a.downcast_ref::<A>())
                    .ok_or_else(|| Error::Parameter {
                        class_id: class.clone(),
                        detail: "constructor argument of unexpected type".into(),
                    })?;
                ctor(config, arg)
            }),
        );
    }

    fn install(&self, class_id: &str, signature: TypeId, ctor: Ctor<B>) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let key = (class_id.to_string(), signature);
        if inner.ctors.contains_key(&key) {
            tracing::warn!(class_id, "constructor already registered; keeping the first");
            return;
        }
        if !inner.order.iter().any(|c| c.as_str() == class_id) {
            inner.order.push(class_id.to_string());
        }
        inner.ctors.insert(key, ctor);
    }

    /// Append one expected-parameters function for `class_id`. Call in
    /// inheritance order, base first.
    pub fn register_schema_fn(&self, class_id: &str, f: SchemaFn) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner
            .schema_fns
            .entry(class_id.to_string())
            .or_default()
            .push(f);
    }

    /// Append a whole inheritance chain at once, base first.
    pub fn register_schema_chain(&self, class_id: &str, chain: &[SchemaFn]) {
        for f in chain {
            self.register_schema_fn(class_id, *f);
        }
    }

    /// Build a fresh schema rooted at `class_id` by running its function
    /// chain, then project it by `rules`.
    pub fn schema(&self, class_id: &str, rules: Option<AssemblyRules>) -> Result<Schema> {
        let chain = {
            let inner = self.inner.lock().expect("registry poisoned");
            inner
                .schema_fns
                .get(class_id)
                .cloned()
                .ok_or_else(|| Error::UnknownClass(class_id.to_string()))?
        };
        let mut schema = Schema::new(class_id);
        for f in chain {
            f(&mut schema).map_err(|err| Error::Parameter {
                class_id: class_id.to_string(),
                detail: err.to_string(),
            })?;
        }
        Ok(match rules {
            Some(rules) => schema.sub_schema_by_rules(&rules),
            None => schema,
        })
    }

    /// Class ids with at least one registered constructor, in registration
    /// order. Stable under duplicate re-registration.
    pub fn registered_classes(&self) -> Vec<String> {
        self.inner.lock().expect("registry poisoned").order.clone()
    }

    pub fn create(&self, class_id: &str, config: &Tree, validate: bool) -> Result<Box<B>> {
        self.create_inner(class_id, TypeId::of::<()>(), config, validate, None)
    }

    pub fn create_with<A: 'static>(
        &self,
        class_id: &str,
        config: &Tree,
        validate: bool,
        arg: &A,
    ) -> Result<Box<B>> {
        self.create_inner(class_id, TypeId::of::<A>(), config, validate, Some(arg))
    }

    /// The single-argument form: the configuration must be rooted with
    /// exactly one top-level key naming the class.
    pub fn create_rooted(&self, config: &Tree, validate: bool) -> Result<Box<B>> {
        if config.len() != 1 {
            return Err(Error::Logic(format!(
                "a rooted configuration has exactly one top-level key, found {}",
                config.len()
            )));
        }
        let class_id = config.keys().next().expect("one key").to_string();
        self.create(&class_id, config, validate)
    }

    /// Build the instance named by the node at `node_name` of `config`.
    pub fn create_node(
        &self,
        node_name: &str,
        class_id: &str,
        config: &Tree,
        validate: bool,
    ) -> Result<Box<B>> {
        let sub = config.get::<Tree>(node_name)?;
        self.create(class_id, sub, validate)
    }

    /// The node at `choice_name` holds exactly one key naming the chosen
    /// class.
    pub fn create_choice(
        &self,
        choice_name: &str,
        config: &Tree,
        validate: bool,
    ) -> Result<Box<B>> {
        let sub = config.get::<Tree>(choice_name)?;
        self.create_rooted(sub, validate)
    }

    /// The node at `list_name` holds a sequence of rooted configurations.
    pub fn create_list(
        &self,
        list_name: &str,
        config: &Tree,
        validate: bool,
    ) -> Result<Vec<Box<B>>> {
        let rows = config.get::<Vec<Tree>>(list_name)?;
        rows.iter()
            .map(|row| self.create_rooted(row, validate))
            .collect()
    }

    fn create_inner(
        &self,
        class_id: &str,
        signature: TypeId,
        config: &Tree,
        validate: bool,
        arg: Option<&dyn Any>,
    ) -> Result<Box<B>> {
        let ctor = {
            let inner = self.inner.lock().expect("registry poisoned");
            inner
                .ctors
                .get(&(class_id.to_string(), signature))
                .cloned()
                .ok_or_else(|| Error::UnknownClass(class_id.to_string()))?
        };

        let validated;
        let config = if validate {
            let schema = self.schema(class_id, None)?;
            let outcome = Validator::default().validate(&schema, config);
            if !outcome.is_accepted() {
                return Err(Error::Validation(outcome.report()));
            }
            validated = outcome.into_validated();
            &validated
        } else {
            config
        };

        // Constructor failures come back tagged with the class id.
        ctor(config, arg).map_err(|err| match err {
            Error::Parameter { class_id, detail } => Error::Parameter { class_id, detail },
            other => Error::Parameter {
                class_id: class_id.to_string(),
                detail: other.to_string(),
            },
        })
    }
}

lazy_static::lazy_static! {
    static ref GLOBALS: Mutex<HashMap<TypeId, Box<dyn Any + Send>>> = Mutex::new(HashMap::new());
}

/// The process-global registry for base type `B`, constructed on first use.
/// Registration and `create` may run concurrently.
pub fn global<B: ?Sized + 'static>() -> Arc<Registry<B>>
where
    Registry<B>: Send + Sync,
{
    let mut globals = GLOBALS.lock().expect("global registries poisoned");
    let entry = globals
        .entry(TypeId::of::<B>())
        .or_insert_with(|| Box::new(Arc::new(Registry::<B>::new())));
    entry
        .downcast_ref::<Arc<Registry<B>>>()
        .expect("registry type is keyed by TypeId")
        .clone()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use schema::elements::{Leaf, OverwriteElement};
    use schema::AccessMode;
    use tree::tree;

    trait Device: Send + std::fmt::Debug {
        fn device_id(&self) -> &str;
        fn interval(&self) -> u32;
    }

    #[derive(Debug)]
    struct Shutter {
        device_id: String,
        interval: u32,
    }

    impl Shutter {
        fn expected_parameters(expected: &mut Schema) -> schema::Result<()> {
            Leaf::<String>::new(expected)
                .key("deviceId")
                .assignment_mandatory()
                .init()
                .commit()?;
            Leaf::<u32>::new(expected)
                .key("interval")
                .assignment_optional()
                .default_value(10)
                .max_inc(60)
                .reconfigurable()
                .commit()?;
            Ok(())
        }

        fn from_config(config: &Tree) -> Result<Self> {
            Ok(Shutter {
                device_id: config.get::<String>("deviceId")?.clone(),
                interval: *config.get::<u32>("interval")?,
            })
        }
    }

    impl Device for Shutter {
        fn device_id(&self) -> &str {
            &self.device_id
        }

        fn interval(&self) -> u32 {
            self.interval
        }
    }

    #[derive(Debug)]
    struct FastShutter(Shutter);

    impl FastShutter {
        fn expected_parameters(expected: &mut Schema) -> schema::Result<()> {
            OverwriteElement::new(expected)
                .key("interval")
                .new_default_value(1u32)
                .new_max_inc(5u32)
                .commit()?;
            Ok(())
        }
    }

    impl Device for FastShutter {
        fn device_id(&self) -> &str {
            self.0.device_id()
        }

        fn interval(&self) -> u32 {
            self.0.interval()
        }
    }

    fn registry() -> Registry<dyn Device> {
        let r = Registry::<dyn Device>::new();
        r.register_schema_fn("Shutter", Shutter::expected_parameters);
        r.register_class("Shutter", |cfg| {
            Ok(Box::new(Shutter::from_config(cfg)?) as Box<dyn Device>)
        });
        // The derived class runs the base chain first.
        r.register_schema_chain(
            "FastShutter",
            &[Shutter::expected_parameters, FastShutter::expected_parameters],
        );
        r.register_class("FastShutter", |cfg| {
            Ok(Box::new(FastShutter(Shutter::from_config(cfg)?)) as Box<dyn Device>)
        });
        r
    }

    #[test]
    fn create_validates_and_injects_defaults() {
        let r = registry();
        let device = r
            .create("Shutter", &tree! { "deviceId" => "sh/1" }, true)
            .unwrap();
        assert_eq!(device.device_id(), "sh/1");
        assert_eq!(device.interval(), 10);
    }

    #[test]
    fn create_rejects_bad_configurations() {
        let r = registry();
        let err = r
            .create("Shutter", &tree! { "interval" => 5u32 }, true)
            .unwrap_err();
        match err {
            Error::Validation(report) => {
                assert!(report.contains("deviceId: missing mandatory parameter"))
            }
            other => panic!("expected a validation error, got {other}"),
        }
    }

    #[test]
    fn derived_chain_overwrites_base_declarations() {
        let r = registry();
        let schema = r.schema("FastShutter", None).unwrap();
        assert_eq!(schema.root_name(), "FastShutter");
        assert_eq!(schema.max_inc("interval"), Some(5.0));

        let device = r
            .create("FastShutter", &tree! { "deviceId" => "sh/2" }, true)
            .unwrap();
        assert_eq!(device.interval(), 1);

        // The overwritten bound now rejects what the base allowed.
        let err = r
            .create(
                "FastShutter",
                &tree! { "deviceId" => "sh/2", "interval" => 30u32 },
                true,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn duplicate_registration_is_tolerated() {
        let r = registry();
        let before = r.registered_classes();
        r.register_class("Shutter", |cfg| {
            Ok(Box::new(Shutter::from_config(cfg)?) as Box<dyn Device>)
        });
        assert_eq!(r.registered_classes(), before);
    }

    #[test]
    fn rooted_creation_requires_exactly_one_key() {
        let r = registry();
        let device = r
            .create_rooted(&tree! { "Shutter.deviceId" => "sh/3" }, true)
            .unwrap();
        assert_eq!(device.device_id(), "sh/3");

        let err = r
            .create_rooted(
                &tree! { "Shutter.deviceId" => "a", "extra" => 1i32 },
                true,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Logic(_)));

        let err = r
            .create_rooted(&tree! { "NoSuchClass.x" => 1i32 }, true)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownClass(_)));
    }

    #[test]
    fn extra_argument_constructors_use_their_own_signature() {
        let r = registry();
        r.register_class_with::<u32, _>("Shutter", |cfg, boost| {
            let mut device = Shutter::from_config(cfg)?;
            device.interval += boost;
            Ok(Box::new(device) as Box<dyn Device>)
        });

        let device = r
            .create_with("Shutter", &tree! { "deviceId" => "sh/4" }, true, &7u32)
            .unwrap();
        assert_eq!(device.interval(), 17);

        // The plain signature is untouched.
        let device = r
            .create("Shutter", &tree! { "deviceId" => "sh/5" }, true)
            .unwrap();
        assert_eq!(device.interval(), 10);
    }

    #[test]
    fn node_choice_and_list_helpers() {
        let r = registry();

        let config = tree! {
            "inner.deviceId" => "sh/6",
            "pick.Shutter.deviceId" => "sh/7",
            "many[0].Shutter.deviceId" => "sh/8",
            "many[1].FastShutter.deviceId" => "sh/9",
        };

        let device = r.create_node("inner", "Shutter", &config, true).unwrap();
        assert_eq!(device.device_id(), "sh/6");

        let device = r.create_choice("pick", &config, true).unwrap();
        assert_eq!(device.device_id(), "sh/7");

        let devices = r.create_list("many", &config, true).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id(), "sh/8");
        assert_eq!(devices[1].interval(), 1);
    }

    #[test]
    fn schema_projection_by_rules() {
        let r = registry();
        let writable = r
            .schema(
                "Shutter",
                Some(AssemblyRules {
                    access_mode_mask: AccessMode::Write as i32,
                    state: None,
                    access_level: None,
                }),
            )
            .unwrap();
        assert!(writable.has("interval"));
        assert!(!writable.has("deviceId"));
    }

    #[test]
    fn global_registries_are_shared_per_base() {
        let a = global::<dyn Device>();
        a.register_schema_fn("Shutter", Shutter::expected_parameters);
        let b = global::<dyn Device>();
        assert!(b.schema("Shutter", None).is_ok());
    }
}
