//! Built-in stages and metrics, registered by an explicit bootstrap.

pub mod evaluate_metrics;
pub mod metrics;
pub mod run_command;

use stagepipe_core::registry::lock_registry;
use stagepipe_core::{Category, Component, SharedRegistry, Stage};
use std::sync::Arc;
use tracing::{debug, warn};

pub use evaluate_metrics::EvaluateMetricsStage;
pub use metrics::{MeanLength, Novelty, Uniqueness};
pub use run_command::RunCommandStage;

/// Names of the built-in components, by category.
pub fn list_builtin_names() -> Vec<(Category, &'static str)> {
    vec![
        (Category::Stage, run_command::NAME),
        (Category::Stage, evaluate_metrics::NAME),
        (Category::Metric, "mean_length"),
        (Category::Metric, "uniqueness"),
        (Category::Metric, "novelty"),
    ]
}

/// Register every built-in component not already present in `registry`.
///
/// Idempotent. Names a plugin registered first are left untouched, so plugin
/// components win over built-ins of the same name. Returns the names added.
pub fn bootstrap(registry: &SharedRegistry) -> Vec<String> {
    let weak = Arc::downgrade(registry);
    let mut guard = lock_registry(registry);
    let mut added = Vec::new();

    for (category, name) in list_builtin_names() {
        if guard.has(category, name) {
            debug!(%category, component = %name, "Keeping existing registration");
            continue;
        }
        let component = match name {
            run_command::NAME => Component::stage::<RunCommandStage>(),
            evaluate_metrics::NAME => {
                let weak = weak.clone();
                Component::stage_fn(move || {
                    Box::new(EvaluateMetricsStage::new(weak.clone())) as Box<dyn Stage>
                })
            }
            "mean_length" => Component::metric::<MeanLength>(),
            "uniqueness" => Component::metric::<Uniqueness>(),
            _ => Component::metric::<Novelty>(),
        };
        match guard.register(category, name, component, false) {
            Ok(()) => added.push(name.to_string()),
            Err(e) => warn!(component = %name, error = %e, "Failed to register built-in"),
        }
    }

    debug!(count = added.len(), "Bootstrapped built-in components");
    added
}
