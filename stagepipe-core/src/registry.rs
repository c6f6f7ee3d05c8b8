//! Component registry: maps (category, name) to component constructors.
//!
//! Built-in stages and metrics are registered by an explicit bootstrap phase,
//! plugins register through the same API. One process-wide default registry
//! exists for convenience call sites, but every consumer also accepts an
//! explicit [`SharedRegistry`], so tests can work against isolated instances.
//!
//! The registry is not synchronized for concurrent mutation. The mutex in
//! [`SharedRegistry`] only lets the default instance live in a static;
//! callers that load plugins from several threads must serialize externally.

use crate::error::{ConfigurationError, ResolutionError};
use crate::metric::{Metric, MetricFactory};
use crate::stage::{Stage, StageFactory};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Component categories the registry accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Encoder,
    Decoder,
    Metric,
    Stage,
    Dataset,
}

impl Category {
    /// Every valid category, in declaration order.
    pub const ALL: [Category; 5] = [
        Category::Encoder,
        Category::Decoder,
        Category::Metric,
        Category::Stage,
        Category::Dataset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Encoder => "encoder",
            Category::Decoder => "decoder",
            Category::Metric => "metric",
            Category::Stage => "stage",
            Category::Dataset => "dataset",
        }
    }

    fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Category {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigurationError::InvalidCategory {
                category: s.to_string(),
                valid: Self::valid_list(),
            })
    }
}

/// A registered component constructor.
#[derive(Clone)]
pub enum Component {
    /// Factory producing a fresh stage instance per resolution.
    Stage(StageFactory),
    /// Factory producing a fresh metric instance per resolution.
    Metric(MetricFactory),
    /// Opaque descriptor for encoders, decoders and datasets; the engine
    /// stores these for plugins but never interprets them.
    Descriptor(Arc<dyn Any + Send + Sync>),
}

impl Component {
    /// Component for a `Default`-constructible stage type.
    pub fn stage<S: Stage + Default + 'static>() -> Self {
        Component::Stage(crate::stage::factory_of::<S>())
    }

    /// Component for a stage built by an arbitrary closure.
    pub fn stage_fn(f: impl Fn() -> Box<dyn Stage> + Send + Sync + 'static) -> Self {
        Component::Stage(Arc::new(f))
    }

    /// Component for a `Default`-constructible metric type.
    pub fn metric<M: Metric + Default + 'static>() -> Self {
        Component::Metric(crate::metric::metric_factory_of::<M>())
    }

    /// Wrap an arbitrary value as a descriptor component.
    pub fn descriptor<T: Any + Send + Sync>(value: T) -> Self {
        Component::Descriptor(Arc::new(value))
    }

    /// Short name of the component kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Component::Stage(_) => "stage",
            Component::Metric(_) => "metric",
            Component::Descriptor(_) => "descriptor",
        }
    }

    /// Borrow a descriptor as a concrete type.
    pub fn as_descriptor<T: Any>(&self) -> Option<&T> {
        match self {
            Component::Descriptor(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component::{}", self.kind())
    }
}

/// Shared, lockable handle to a registry.
pub type SharedRegistry = Arc<Mutex<ComponentRegistry>>;

static GLOBAL: LazyLock<SharedRegistry> = LazyLock::new(ComponentRegistry::shared);

/// Lock a shared registry, recovering the data if a previous holder panicked.
pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, ComponentRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The registry holds all registered components, grouped by category.
pub struct ComponentRegistry {
    components: BTreeMap<Category, BTreeMap<String, Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            components: Category::ALL
                .into_iter()
                .map(|c| (c, BTreeMap::new()))
                .collect(),
        }
    }

    /// A fresh, isolated registry behind a shared handle.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Handle to the process-wide default registry.
    pub fn global() -> SharedRegistry {
        GLOBAL.clone()
    }

    /// Remove every registration from the process-wide default registry.
    pub fn reset_global() {
        lock_registry(&GLOBAL).clear_all();
    }

    /// Register a component under a category and name.
    ///
    /// Fails if the category is unknown, the name is empty, or the name is
    /// already taken and `overwrite` is false.
    pub fn register(
        &mut self,
        category: impl AsRef<str>,
        name: &str,
        component: Component,
        overwrite: bool,
    ) -> Result<(), ConfigurationError> {
        let category: Category = category.as_ref().parse()?;
        if name.is_empty() {
            return Err(ConfigurationError::InvalidName {
                category: category.to_string(),
            });
        }
        let entries = self.components.entry(category).or_default();
        if entries.contains_key(name) && !overwrite {
            return Err(ConfigurationError::DuplicateName {
                category: category.to_string(),
                name: name.to_string(),
            });
        }
        debug!(%category, component = %name, kind = component.kind(), overwrite, "Registering component");
        entries.insert(name.to_string(), component);
        Ok(())
    }

    /// Register a stage factory under the `stage` category.
    pub fn register_stage(
        &mut self,
        name: &str,
        factory: StageFactory,
    ) -> Result<(), ConfigurationError> {
        self.register(Category::Stage, name, Component::Stage(factory), false)
    }

    /// Register a metric factory under the `metric` category.
    pub fn register_metric(
        &mut self,
        name: &str,
        factory: MetricFactory,
    ) -> Result<(), ConfigurationError> {
        self.register(Category::Metric, name, Component::Metric(factory), false)
    }

    /// Retrieve a registered component.
    pub fn get(&self, category: impl AsRef<str>, name: &str) -> Result<&Component, ResolutionError> {
        let raw = category.as_ref();
        let category: Category = raw.parse().map_err(|_| ResolutionError::UnknownCategory {
            category: raw.to_string(),
        })?;
        let entries = self.components.get(&category);
        entries
            .and_then(|e| e.get(name))
            .ok_or_else(|| ResolutionError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
                available: entries.map(|e| e.keys().cloned().collect()).unwrap_or_default(),
            })
    }

    /// Check whether a component is registered. Unknown categories yield `false`.
    pub fn has(&self, category: impl AsRef<str>, name: &str) -> bool {
        category
            .as_ref()
            .parse::<Category>()
            .ok()
            .and_then(|c| self.components.get(&c))
            .is_some_and(|e| e.contains_key(name))
    }

    /// Names registered under one category, sorted.
    pub fn list(&self, category: impl AsRef<str>) -> Result<Vec<String>, ConfigurationError> {
        let category: Category = category.as_ref().parse()?;
        Ok(self
            .components
            .get(&category)
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Every category with its registered names.
    pub fn list_all(&self) -> BTreeMap<Category, Vec<String>> {
        self.components
            .iter()
            .map(|(c, e)| (*c, e.keys().cloned().collect()))
            .collect()
    }

    /// Remove a component. Absent entries and unknown categories are a no-op.
    pub fn unregister(&mut self, category: impl AsRef<str>, name: &str) {
        let Ok(category) = category.as_ref().parse::<Category>() else {
            return;
        };
        if let Some(entries) = self.components.get_mut(&category) {
            if entries.remove(name).is_some() {
                debug!(%category, component = %name, "Unregistered component");
            }
        }
    }

    /// Clear one category. Unknown categories are a no-op.
    pub fn clear(&mut self, category: impl AsRef<str>) {
        if let Ok(category) = category.as_ref().parse::<Category>() {
            if let Some(entries) = self.components.get_mut(&category) {
                entries.clear();
            }
        }
    }

    /// Clear every category.
    pub fn clear_all(&mut self) {
        for entries in self.components.values_mut() {
            entries.clear();
        }
    }

    /// Build a fresh instance of the stage registered as `name`.
    pub fn resolve_stage(&self, name: &str) -> Result<Box<dyn Stage>, ResolutionError> {
        match self.get(Category::Stage, name)? {
            Component::Stage(factory) => Ok(factory()),
            _ => Err(ResolutionError::WrongKind {
                category: Category::Stage.to_string(),
                name: name.to_string(),
                expected: "stage",
            }),
        }
    }

    /// Build a fresh instance of the metric registered as `name`.
    pub fn resolve_metric(&self, name: &str) -> Result<Box<dyn Metric>, ResolutionError> {
        match self.get(Category::Metric, name)? {
            Component::Metric(factory) => Ok(factory()),
            _ => Err(ResolutionError::WrongKind {
                category: Category::Metric.to_string(),
                name: name.to_string(),
                expected: "metric",
            }),
        }
    }

    /// Total number of registered components across all categories.
    pub fn len(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::StageError;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct EchoStage;

    impl Stage for EchoStage {
        fn name(&self) -> &str {
            "echo"
        }

        fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
            Ok(vec![])
        }

        fn run(&self, _config: &Value, mut context: Context) -> Result<Context, StageError> {
            context.insert("echo".into(), json!("v1"));
            Ok(context)
        }
    }

    #[derive(Default)]
    struct EchoStageV2;

    impl Stage for EchoStageV2 {
        fn name(&self) -> &str {
            "echo"
        }

        fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
            Ok(vec![])
        }

        fn run(&self, _config: &Value, mut context: Context) -> Result<Context, StageError> {
            context.insert("echo".into(), json!("v2"));
            Ok(context)
        }
    }

    #[derive(Default)]
    struct CountMetric;

    impl Metric for CountMetric {
        fn name(&self) -> &str {
            "count"
        }

        fn compute(&self, predictions: &[String], _references: Option<&[String]>) -> Result<f64, StageError> {
            Ok(predictions.len() as f64)
        }
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ComponentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.list_all().len(), 5);
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "echo", Component::stage::<EchoStage>(), false)
            .unwrap();
        assert!(registry.has("stage", "echo"));
        assert_eq!(registry.get("stage", "echo").unwrap().kind(), "stage");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_invalid_category() {
        let mut registry = ComponentRegistry::new();
        let err = registry
            .register("widget", "x", Component::stage::<EchoStage>(), false)
            .unwrap_err();
        match err {
            ConfigurationError::InvalidCategory { category, valid } => {
                assert_eq!(category, "widget");
                assert!(valid.contains("encoder"));
            }
            other => panic!("Expected InvalidCategory, got: {:?}", other),
        }
    }

    #[test]
    fn test_register_empty_name() {
        let mut registry = ComponentRegistry::new();
        let err = registry
            .register(Category::Stage, "", Component::stage::<EchoStage>(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidName { .. }));
    }

    #[test]
    fn test_register_duplicate_without_overwrite() {
        let mut registry = ComponentRegistry::new();
        registry
            .register_stage("echo", crate::stage::factory_of::<EchoStage>())
            .unwrap();
        let err = registry
            .register_stage("echo", crate::stage::factory_of::<EchoStageV2>())
            .unwrap_err();
        match err {
            ConfigurationError::DuplicateName { category, name } => {
                assert_eq!(category, "stage");
                assert_eq!(name, "echo");
            }
            other => panic!("Expected DuplicateName, got: {:?}", other),
        }
    }

    #[test]
    fn test_register_overwrite_replaces() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "echo", Component::stage::<EchoStage>(), false)
            .unwrap();
        registry
            .register("stage", "echo", Component::stage::<EchoStageV2>(), true)
            .unwrap();
        let stage = registry.resolve_stage("echo").unwrap();
        let out = stage.run(&json!({}), Context::new()).unwrap();
        assert_eq!(out["echo"], json!("v2"));
    }

    #[test]
    fn test_same_name_in_different_categories() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "shared", Component::stage::<EchoStage>(), false)
            .unwrap();
        registry
            .register("metric", "shared", Component::metric::<CountMetric>(), false)
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_not_found_lists_available() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("metric", "count", Component::metric::<CountMetric>(), false)
            .unwrap();
        let err = registry.get("metric", "fid").unwrap_err();
        match &err {
            ResolutionError::NotFound { available, .. } => {
                assert_eq!(available, &vec!["count".to_string()]);
            }
            other => panic!("Expected NotFound, got: {:?}", other),
        }
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn test_get_unknown_category() {
        let registry = ComponentRegistry::new();
        let err = registry.get("widget", "x").unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownCategory { .. }));
    }

    #[test]
    fn test_has_unknown_category_is_false() {
        let registry = ComponentRegistry::new();
        assert!(!registry.has("widget", "anything"));
        assert!(!registry.has("stage", "missing"));
    }

    #[test]
    fn test_list_and_list_all() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "b_stage", Component::stage::<EchoStage>(), false)
            .unwrap();
        registry
            .register("stage", "a_stage", Component::stage::<EchoStage>(), false)
            .unwrap();
        assert_eq!(registry.list("stage").unwrap(), vec!["a_stage", "b_stage"]);
        assert!(registry.list("encoder").unwrap().is_empty());
        assert!(registry.list("widget").is_err());

        let all = registry.list_all();
        assert_eq!(all[&Category::Stage].len(), 2);
        assert!(all[&Category::Dataset].is_empty());
    }

    #[test]
    fn test_unregister_is_noop_when_absent() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "echo", Component::stage::<EchoStage>(), false)
            .unwrap();
        registry.unregister("stage", "echo");
        assert!(!registry.has("stage", "echo"));
        registry.unregister("stage", "echo");
        registry.unregister("widget", "echo");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_one_category_and_all() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "echo", Component::stage::<EchoStage>(), false)
            .unwrap();
        registry
            .register("metric", "count", Component::metric::<CountMetric>(), false)
            .unwrap();
        registry.clear("stage");
        assert!(!registry.has("stage", "echo"));
        assert!(registry.has("metric", "count"));
        registry.clear_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_wrong_kind() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("stage", "odd", Component::descriptor("not a stage"), false)
            .unwrap();
        let err = registry.resolve_stage("odd").err().unwrap();
        assert!(matches!(err, ResolutionError::WrongKind { expected: "stage", .. }));
    }

    #[test]
    fn test_resolve_metric() {
        let mut registry = ComponentRegistry::new();
        registry
            .register_metric("count", crate::metric::metric_factory_of::<CountMetric>())
            .unwrap();
        let metric = registry.resolve_metric("count").unwrap();
        let preds = vec!["AB".to_string(), "C".to_string()];
        assert_eq!(metric.compute(&preds, None).unwrap(), 2.0);
        assert!(!metric.requires_references());
    }

    #[test]
    fn test_descriptor_downcast() {
        let component = Component::descriptor(String::from("esm2"));
        assert_eq!(component.as_descriptor::<String>().unwrap(), "esm2");
        assert!(component.as_descriptor::<u32>().is_none());
    }

    #[test]
    fn test_category_parse_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("Stage".parse::<Category>().is_err());
    }

    #[test]
    fn test_shared_instances_are_isolated() {
        let a = ComponentRegistry::shared();
        let b = ComponentRegistry::shared();
        lock_registry(&a)
            .register("stage", "echo", Component::stage::<EchoStage>(), false)
            .unwrap();
        assert!(lock_registry(&a).has("stage", "echo"));
        assert!(!lock_registry(&b).has("stage", "echo"));
    }
}
