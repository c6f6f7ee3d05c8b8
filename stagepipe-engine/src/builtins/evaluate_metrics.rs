//! `evaluate_metrics` stage: computes registered metrics over generated sequences.

use serde_json::{Map, Value};
use stagepipe_core::context;
use stagepipe_core::registry::lock_registry;
use stagepipe_core::{ComponentRegistry, Context, Stage, StageError};
use std::path::Path;
use std::sync::{Mutex, Weak};
use tracing::info;

pub const NAME: &str = "evaluate_metrics";

pub const GENERATED_SEQUENCES: &str = "generated_sequences";
pub const GENERATED_SEQUENCES_PATH: &str = "generated_sequences_path";
pub const REFERENCE_SEQUENCES: &str = "reference_sequences";
pub const METRICS_RESULTS: &str = "metrics_results";
pub const METRICS_OUTPUT_PATH: &str = "metrics_output_path";

const DEFAULT_OUTPUT_PATH: &str = "metrics_results.json";

/// Resolves metrics from the registry it was registered in.
pub struct EvaluateMetricsStage {
    registry: Weak<Mutex<ComponentRegistry>>,
}

impl EvaluateMetricsStage {
    pub fn new(registry: Weak<Mutex<ComponentRegistry>>) -> Self {
        Self { registry }
    }

    fn load_sequences(context: &Context) -> Result<Vec<String>, StageError> {
        if let Some(value) = context.get(GENERATED_SEQUENCES) {
            return string_list(value, GENERATED_SEQUENCES);
        }
        let path = context
            .get(GENERATED_SEQUENCES_PATH)
            .and_then(Value::as_str)
            .filter(|p| Path::new(p).exists())
            .ok_or_else(|| StageError::MissingInput {
                stage: NAME.into(),
                key: GENERATED_SEQUENCES.into(),
            })?;
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        string_list(&value, GENERATED_SEQUENCES_PATH)
    }

    /// Metric names from `stage_params.evaluate_metrics.metrics`, falling back
    /// to the keys of the domain config's `metrics` section.
    fn metric_names(config: &Value, context: &Context) -> Result<Vec<String>, StageError> {
        if let Some(names) = context::stage_params(context, NAME).and_then(|p| p.get("metrics")) {
            return string_list(names, "metrics");
        }
        Ok(match config.get("metrics") {
            Some(Value::Object(section)) => section.keys().cloned().collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        })
    }
}

impl Stage for EvaluateMetricsStage {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Compute evaluation metrics on generated sequences"
    }

    fn validate(&self, _config: &Value, context: &Context) -> Result<Vec<String>, StageError> {
        let mut issues = Vec::new();
        if !context.contains_key(GENERATED_SEQUENCES) && !context.contains_key(GENERATED_SEQUENCES_PATH) {
            issues.push("No generated sequences available. Run run_inference first.".to_string());
        }
        Ok(issues)
    }

    fn run(&self, config: &Value, mut context: Context) -> Result<Context, StageError> {
        let sequences = Self::load_sequences(&context)?;
        let references = match context.get(REFERENCE_SEQUENCES) {
            Some(value) => string_list(value, REFERENCE_SEQUENCES)?,
            None => Vec::new(),
        };
        let names = Self::metric_names(config, &context)?;

        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| StageError::failed(NAME, "component registry is no longer available"))?;

        let mut results = Map::new();
        for metric_name in &names {
            let metric = lock_registry(&registry).resolve_metric(metric_name)?;

            let limit = config
                .pointer(&format!("/metrics/{}/num_samples", metric_name))
                .and_then(Value::as_u64)
                .map_or(sequences.len(), |n| n as usize);
            let preds = &sequences[..limit.min(sequences.len())];
            let refs = (!references.is_empty())
                .then(|| &references[..limit.min(references.len())]);

            let value = metric.compute(preds, refs)?;
            info!(metric = %metric_name, value, samples = preds.len(), "Computed metric");
            results.insert(metric_name.clone(), Value::from(value));
        }

        let output_path = context
            .get(METRICS_OUTPUT_PATH)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_OUTPUT_PATH)
            .to_string();
        let results = Value::Object(results);
        std::fs::write(&output_path, serde_json::to_string_pretty(&results)?)?;
        info!(path = %output_path, "Saved metrics results");

        context.insert(METRICS_RESULTS.into(), results);
        context.insert(METRICS_OUTPUT_PATH.into(), Value::String(output_path));
        Ok(context)
    }
}

fn string_list(value: &Value, key: &str) -> Result<Vec<String>, StageError> {
    let items = value.as_array().ok_or_else(|| StageError::InvalidParams {
        stage: NAME.into(),
        reason: format!("'{}' must be a list of strings", key),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(String::from)
                .ok_or_else(|| StageError::InvalidParams {
                    stage: NAME.into(),
                    reason: format!("'{}' must be a list of strings", key),
                })
        })
        .collect()
}
