//! Plugin-side export glue.
//!
//! A `cdylib` plugin links its own copy of std, so a panic raised inside it
//! is a foreign exception to the host: the host's `catch_unwind` cannot stop
//! it and the process aborts. Panics therefore have to be caught before they
//! cross the library boundary. [`declare_plugin!`](crate::declare_plugin)
//! generates the exported `register` symbol around [`guarded_register`], which
//! runs the plugin's registration under `catch_unwind` and wraps every stage
//! and metric factory it registers so that construction, `validate`, `run`
//! and `compute` are guarded too. All of this code is compiled into the
//! plugin, so it unwinds on the plugin's runtime.
//!
//! ```ignore
//! fn register_components(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
//!     registry.register_stage("custom_hello", factory_of::<HelloStage>())?;
//!     Ok(())
//! }
//!
//! stagepipe_plugins::declare_plugin!(register_components);
//! ```

use crate::{EntryPoint, PluginEntryError};
use serde_json::Value;
use stagepipe_core::{
    Category, Component, Context, Metric, MetricFactory, Stage, StageError, StageFactory,
    panic_message,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub use stagepipe_core::ComponentRegistry;

/// Export `register` for a plugin library, guarding it against panics.
///
/// Takes the path of a function with the [`EntryPoint`](crate::EntryPoint)
/// signature.
#[macro_export]
macro_rules! declare_plugin {
    ($register:path) => {
        /// Plugin entry point looked up by the stagepipe loader.
        #[unsafe(no_mangle)]
        pub fn register(
            registry: &mut $crate::export::ComponentRegistry,
        ) -> ::std::result::Result<(), $crate::PluginEntryError> {
            $crate::export::guarded_register(registry, $register)
        }
    };
}

/// Run `register` against `registry` without letting a panic escape.
///
/// Stage and metric factories added or replaced by `register` are wrapped in
/// panic guards, including those registered before a failure or panic, since
/// registration is not transactional.
pub fn guarded_register(
    registry: &mut ComponentRegistry,
    register: EntryPoint,
) -> Result<(), PluginEntryError> {
    let before = factories(registry);
    let outcome = catch_unwind(AssertUnwindSafe(|| register(registry)));

    for (category, name, component) in factories(registry) {
        let unchanged = before
            .iter()
            .any(|(c, n, old)| *c == category && *n == name && same_factory(old, &component));
        if unchanged {
            continue;
        }
        // Overwriting an entry that was just written cannot fail.
        let _ = registry.register(category, &name, guard_component(&name, component), true);
    }

    match outcome {
        Ok(result) => result,
        Err(payload) => Err(PluginEntryError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn factories(registry: &ComponentRegistry) -> Vec<(Category, String, Component)> {
    [Category::Stage, Category::Metric]
        .into_iter()
        .flat_map(move |category| {
            registry
                .list(category)
                .unwrap_or_default()
                .into_iter()
                .filter_map(move |name| {
                    let component = registry.get(category, &name).ok()?.clone();
                    Some((category, name, component))
                })
        })
        .collect()
}

fn same_factory(a: &Component, b: &Component) -> bool {
    match (a, b) {
        (Component::Stage(a), Component::Stage(b)) => Arc::ptr_eq(a, b),
        (Component::Metric(a), Component::Metric(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn guard_component(name: &str, component: Component) -> Component {
    let name = name.to_string();
    match component {
        Component::Stage(factory) => Component::stage_fn(move || -> Box<dyn Stage> {
            Box::new(GuardedStage::build(&name, &factory))
        }),
        Component::Metric(factory) => {
            let guarded: MetricFactory = Arc::new(move || -> Box<dyn Metric> {
                Box::new(GuardedMetric::build(&name, &factory))
            });
            Component::Metric(guarded)
        }
        other => other,
    }
}

fn panicked(name: &str, message: String) -> StageError {
    StageError::Panicked {
        stage: name.to_string(),
        message,
    }
}

/// Stage whose every call runs under `catch_unwind`.
struct GuardedStage {
    name: String,
    inner: Result<Box<dyn Stage>, String>,
}

impl GuardedStage {
    fn build(name: &str, factory: &StageFactory) -> Self {
        let inner = catch_unwind(AssertUnwindSafe(|| factory()))
            .map_err(|payload| format!("constructor: {}", panic_message(payload.as_ref())));
        Self {
            name: name.to_string(),
            inner,
        }
    }

    fn instance(&self) -> Result<&dyn Stage, StageError> {
        self.inner
            .as_deref()
            .map_err(|message| panicked(&self.name, message.clone()))
    }
}

impl Stage for GuardedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        match &self.inner {
            Ok(stage) => catch_unwind(AssertUnwindSafe(|| stage.description())).unwrap_or(""),
            Err(_) => "",
        }
    }

    fn validate(&self, config: &Value, context: &Context) -> Result<Vec<String>, StageError> {
        let stage = self.instance()?;
        catch_unwind(AssertUnwindSafe(|| stage.validate(config, context)))
            .unwrap_or_else(|payload| Err(panicked(&self.name, panic_message(payload.as_ref()))))
    }

    fn run(&self, config: &Value, context: Context) -> Result<Context, StageError> {
        let stage = self.instance()?;
        catch_unwind(AssertUnwindSafe(|| stage.run(config, context)))
            .unwrap_or_else(|payload| Err(panicked(&self.name, panic_message(payload.as_ref()))))
    }
}

/// Metric whose every call runs under `catch_unwind`.
struct GuardedMetric {
    name: String,
    inner: Result<Box<dyn Metric>, String>,
}

impl GuardedMetric {
    fn build(name: &str, factory: &MetricFactory) -> Self {
        let inner = catch_unwind(AssertUnwindSafe(|| factory()))
            .map_err(|payload| format!("constructor: {}", panic_message(payload.as_ref())));
        Self {
            name: name.to_string(),
            inner,
        }
    }

    fn flag(&self, f: impl Fn(&dyn Metric) -> bool) -> bool {
        match &self.inner {
            Ok(metric) => catch_unwind(AssertUnwindSafe(|| f(metric.as_ref()))).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Metric for GuardedMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_references(&self) -> bool {
        self.flag(|m| m.requires_references())
    }

    fn is_per_sample(&self) -> bool {
        self.flag(|m| m.is_per_sample())
    }

    fn compute(&self, predictions: &[String], references: Option<&[String]>) -> Result<f64, StageError> {
        let metric = self
            .inner
            .as_deref()
            .map_err(|message| panicked(&self.name, message.clone()))?;
        catch_unwind(AssertUnwindSafe(|| metric.compute(predictions, references)))
            .unwrap_or_else(|payload| Err(panicked(&self.name, panic_message(payload.as_ref()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagepipe_core::factory_of;

    #[derive(Default)]
    struct Exploding;

    impl Stage for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
            panic!("validate blew up")
        }

        fn run(&self, _config: &Value, _context: Context) -> Result<Context, StageError> {
            panic!("run blew up")
        }
    }

    #[derive(Default)]
    struct Quiet;

    impl Stage for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
            Ok(vec![])
        }

        fn run(&self, _config: &Value, mut context: Context) -> Result<Context, StageError> {
            context.insert("quiet_ran".into(), json!(true));
            Ok(context)
        }
    }

    #[derive(Default)]
    struct BrokenMetric;

    impl Metric for BrokenMetric {
        fn name(&self) -> &str {
            "broken"
        }

        fn requires_references(&self) -> bool {
            panic!("flag blew up")
        }

        fn compute(&self, _p: &[String], _r: Option<&[String]>) -> Result<f64, StageError> {
            panic!("compute blew up")
        }
    }

    fn register_exploding(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
        registry.register_stage("exploding", factory_of::<Exploding>())?;
        registry.register_metric("broken", stagepipe_core::metric_factory_of::<BrokenMetric>())?;
        Ok(())
    }

    fn register_then_panic(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
        registry.register_stage("quiet", factory_of::<Quiet>())?;
        panic!("register blew up")
    }

    fn register_unbuildable(
        registry: &mut ComponentRegistry,
    ) -> Result<(), PluginEntryError> {
        registry.register(
            "stage",
            "unbuildable",
            Component::stage_fn(|| -> Box<dyn Stage> { panic!("constructor blew up") }),
            false,
        )?;
        Ok(())
    }

    #[test]
    fn test_stage_panics_become_errors() {
        let mut registry = ComponentRegistry::new();
        guarded_register(&mut registry, register_exploding).unwrap();

        let stage = registry.resolve_stage("exploding").unwrap();
        assert_eq!(stage.name(), "exploding");

        let err = stage.run(&json!({}), Context::new()).unwrap_err();
        assert_eq!(err.to_string(), "Stage 'exploding' panicked: run blew up");
        let err = stage.validate(&json!({}), &Context::new()).unwrap_err();
        assert!(matches!(err, StageError::Panicked { .. }));
    }

    #[test]
    fn test_metric_panics_become_errors() {
        let mut registry = ComponentRegistry::new();
        guarded_register(&mut registry, register_exploding).unwrap();

        let metric = registry.resolve_metric("broken").unwrap();
        assert!(!metric.requires_references());
        let err = metric.compute(&["A".to_string()], None).unwrap_err();
        assert_eq!(err.to_string(), "Stage 'broken' panicked: compute blew up");
    }

    #[test]
    fn test_register_panic_is_reported_and_earlier_entries_are_guarded() {
        let mut registry = ComponentRegistry::new();
        let err = guarded_register(&mut registry, register_then_panic).unwrap_err();
        assert_eq!(err.to_string(), "panicked: register blew up");

        let out = registry
            .resolve_stage("quiet")
            .unwrap()
            .run(&json!({}), Context::new())
            .unwrap();
        assert_eq!(out["quiet_ran"], json!(true));
    }

    #[test]
    fn test_constructor_panic_surfaces_on_run() {
        let mut registry = ComponentRegistry::new();
        guarded_register(&mut registry, register_unbuildable).unwrap();

        let stage = registry.resolve_stage("unbuildable").unwrap();
        assert_eq!(stage.name(), "unbuildable");
        let err = stage.run(&json!({}), Context::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stage 'unbuildable' panicked: constructor: constructor blew up"
        );
    }

    #[test]
    fn test_existing_entries_are_left_alone() {
        let mut registry = ComponentRegistry::new();
        let host_factory = factory_of::<Quiet>();
        registry.register_stage("quiet", host_factory.clone()).unwrap();

        guarded_register(&mut registry, register_exploding).unwrap();

        match registry.get("stage", "quiet").unwrap() {
            Component::Stage(factory) => assert!(Arc::ptr_eq(factory, &host_factory)),
            other => panic!("unexpected component {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_registration_error_passes_through() {
        let mut registry = ComponentRegistry::new();
        guarded_register(&mut registry, register_exploding).unwrap();
        let err = guarded_register(&mut registry, register_exploding).unwrap_err();
        assert!(matches!(err, PluginEntryError::Registration(_)));
    }
}
