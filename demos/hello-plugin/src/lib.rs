//! Example third-party plugin.
//!
//! Build with `cargo build -p hello-plugin` and reference the resulting
//! library from a pipeline document:
//!
//! ```yaml
//! plugins:
//!   - path: target/debug/libhello_plugin.so
//! stages:
//!   - name: custom_hello
//! ```

use serde_json::Value;
use stagepipe_core::{
    ComponentRegistry, Context, Metric, Stage, StageError, factory_of, metric_factory_of,
};
use stagepipe_plugins::PluginEntryError;
use tracing::info;

/// Average sequence length.
#[derive(Debug, Default)]
pub struct AvgSeqLength;

impl Metric for AvgSeqLength {
    fn name(&self) -> &str {
        "avg_seq_length"
    }

    fn compute(&self, predictions: &[String], _references: Option<&[String]>) -> Result<f64, StageError> {
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let total: usize = predictions.iter().map(String::len).sum();
        Ok(total as f64 / predictions.len() as f64)
    }
}

/// Marks the context so callers can tell the plugin stage ran.
#[derive(Debug, Default)]
pub struct HelloStage;

impl Stage for HelloStage {
    fn name(&self) -> &str {
        "custom_hello"
    }

    fn description(&self) -> &str {
        "A test stage that just says hello"
    }

    fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
        Ok(vec![])
    }

    fn run(&self, _config: &Value, mut context: Context) -> Result<Context, StageError> {
        // Only reaches a subscriber when this crate is linked statically.
        info!("Hello from the plugin!");
        context.insert("custom_hello_ran".into(), Value::Bool(true));
        Ok(context)
    }
}

fn register_components(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
    registry.register_metric("avg_seq_length", metric_factory_of::<AvgSeqLength>())?;
    registry.register_stage("custom_hello", factory_of::<HelloStage>())?;
    Ok(())
}

stagepipe_plugins::declare_plugin!(register_components);
