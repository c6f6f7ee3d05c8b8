//! Pipeline orchestrator: runs configured stages in order over a shared context.
//!
//! A run loads plugins, bootstraps built-ins, seeds the context, reports
//! validation issues as warnings, then executes each enabled stage. A stage
//! failure is recorded and, depending on the stage's `on_failure` policy,
//! either stops the run or lets it continue. The orchestrator never retries.

use crate::builtins;
use crate::error::PipelineError;
use crate::pipeline::{
    ExecutionResult, FailurePolicy, PipelineConfig, StageSpec, load_pipeline, parse_pipeline,
};
use serde_json::{Map, Value};
use stagepipe_core::context::{CONFIG_PATH, HYDRA_OVERRIDES, PIPELINE_RESULTS, STAGE_PARAMS};
use stagepipe_core::registry::lock_registry;
use stagepipe_core::{ComponentRegistry, Context, SharedRegistry, Stage, StageError, panic_message};
use stagepipe_plugins::PluginLoader;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Validation issues reported for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageIssues {
    pub stage: String,
    pub issues: Vec<String>,
}

/// Executes a pipeline document against a registry.
pub struct PipelineOrchestrator {
    pipeline: PipelineConfig,
    domain_config: Value,
    dry_run: bool,
    context: Context,
    registry: SharedRegistry,
    loader: PluginLoader,
}

impl PipelineOrchestrator {
    /// Create an orchestrator over the process-wide default registry.
    pub fn new(pipeline: PipelineConfig, domain_config: Option<Value>, dry_run: bool) -> Self {
        Self {
            pipeline,
            domain_config: domain_config.unwrap_or_else(|| Value::Object(Map::new())),
            dry_run,
            context: Context::new(),
            registry: ComponentRegistry::global(),
            loader: PluginLoader::new(),
        }
    }

    /// Parse a YAML pipeline document and build an orchestrator for it.
    pub fn from_yaml_str(
        yaml: &str,
        domain_config: Option<Value>,
        dry_run: bool,
    ) -> Result<Self, PipelineError> {
        Ok(Self::new(parse_pipeline(yaml)?, domain_config, dry_run))
    }

    /// Load a YAML pipeline document from disk and build an orchestrator for it.
    pub fn from_path(
        path: &Path,
        domain_config: Option<Value>,
        dry_run: bool,
    ) -> Result<Self, PipelineError> {
        Ok(Self::new(load_pipeline(path)?, domain_config, dry_run))
    }

    /// Use an explicit registry instead of the process default.
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use an explicit plugin loader.
    pub fn with_plugin_loader(mut self, loader: PluginLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn plugin_loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn plugin_loader_mut(&mut self) -> &mut PluginLoader {
        &mut self.loader
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Mutable access for pre-seeding keys before `run`.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Append override tokens after the document's own.
    pub fn add_overrides<I, S>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipeline
            .hydra_overrides
            .extend(overrides.into_iter().map(Into::into));
    }

    /// Enabled stages in configured order.
    pub fn enabled_stages(&self) -> Vec<&StageSpec> {
        self.pipeline.enabled_stages().collect()
    }

    /// Validate every enabled stage against the current context.
    ///
    /// Built-ins are bootstrapped first so they resolve before `run`. Stages
    /// without issues are omitted. Resolution failures, validation errors and
    /// panics each become a single issue.
    pub fn validate(&self) -> Vec<StageIssues> {
        builtins::bootstrap(&self.registry);
        let mut report = Vec::new();
        for spec in self.pipeline.enabled_stages() {
            let resolved = lock_registry(&self.registry).resolve_stage(&spec.name);
            let issues = match resolved {
                Ok(stage) => {
                    match catch_unwind(AssertUnwindSafe(|| {
                        stage.validate(&self.domain_config, &self.context)
                    })) {
                        Ok(Ok(issues)) => issues,
                        Ok(Err(e)) => vec![format!("Validation error: {}", e)],
                        Err(payload) => vec![format!(
                            "Validation error: panicked: {}",
                            panic_message(payload.as_ref())
                        )],
                    }
                }
                Err(e) => vec![format!("Validation error: {}", e)],
            };
            if !issues.is_empty() {
                report.push(StageIssues {
                    stage: spec.name.clone(),
                    issues,
                });
            }
        }
        report
    }

    /// Execute the pipeline and return the final context.
    ///
    /// Fails only if plugin loading fails; stage failures are recorded under
    /// `pipeline_results` instead.
    pub fn run(&mut self) -> Result<Context, PipelineError> {
        self.load_plugins()?;
        builtins::bootstrap(&self.registry);

        if self.pipeline.enabled_stages().next().is_none() {
            warn!("No stages enabled in pipeline config");
            return Ok(self.context.clone());
        }

        self.seed_context();

        if !self.dry_run {
            for report in self.validate() {
                for issue in &report.issues {
                    warn!(stage = %report.stage, issue = %issue, "Validation issue");
                }
            }
        }

        if self.dry_run {
            self.log_plan();
            return Ok(self.context.clone());
        }

        let mut context = std::mem::take(&mut self.context);
        let mut results = Map::new();
        let enabled: Vec<StageSpec> = self.pipeline.enabled_stages().cloned().collect();
        let total = enabled.len();

        for (idx, spec) in enabled.iter().enumerate() {
            info!(stage = %spec.name, step = idx + 1, total, "Running stage");

            let snapshot = context.clone();
            let started = Instant::now();
            let resolved = lock_registry(&self.registry).resolve_stage(&spec.name);
            let outcome = resolved
                .map_err(StageError::from)
                .and_then(|stage| run_guarded(stage.as_ref(), &spec.name, &self.domain_config, context));
            let elapsed = started.elapsed();

            let failed = match outcome {
                Ok(next) => {
                    context = next;
                    let result = ExecutionResult::success(elapsed);
                    info!(stage = %spec.name, elapsed_seconds = result.elapsed_seconds, "Stage completed");
                    results.insert(spec.name.clone(), result.to_json());
                    false
                }
                Err(e) => {
                    context = snapshot;
                    let result = ExecutionResult::failed(elapsed, e.to_string());
                    error!(stage = %spec.name, elapsed_seconds = result.elapsed_seconds, error = %e, "Stage failed");
                    results.insert(spec.name.clone(), result.to_json());
                    true
                }
            };

            if failed {
                match spec.on_failure {
                    FailurePolicy::Abort => {
                        error!(stage = %spec.name, "Pipeline aborted");
                        break;
                    }
                    FailurePolicy::Continue => {
                        warn!(stage = %spec.name, "Continuing despite failure");
                    }
                }
            }
        }

        context.insert(PIPELINE_RESULTS.into(), Value::Object(results));
        self.context = context;
        Ok(self.context.clone())
    }

    fn load_plugins(&mut self) -> Result<(), PipelineError> {
        if self.pipeline.plugins.is_empty() {
            return Ok(());
        }
        let mut registry = lock_registry(&self.registry);
        let units = self.loader.load_many(&self.pipeline.plugins, &mut registry)?;
        info!(count = units.len(), units = ?units, "Loaded plugins");
        Ok(())
    }

    fn seed_context(&mut self) {
        let config_path = self.pipeline.effective_config_path().to_string();
        self.context
            .insert(CONFIG_PATH.into(), Value::String(config_path));

        let stage_params: Map<String, Value> = self
            .pipeline
            .enabled_stages()
            .filter(|s| !s.params.is_empty())
            .map(|s| (s.name.clone(), Value::Object(s.params.clone())))
            .collect();
        self.context
            .insert(STAGE_PARAMS.into(), Value::Object(stage_params));

        if !self.pipeline.hydra_overrides.is_empty() {
            let overrides = self
                .pipeline
                .hydra_overrides
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            self.context
                .insert(HYDRA_OVERRIDES.into(), Value::Array(overrides));
        }
    }

    fn log_plan(&self) {
        info!("[DRY RUN] Pipeline stages:");
        for (idx, spec) in self.pipeline.enabled_stages().enumerate() {
            let params = Value::Object(spec.params.clone());
            info!(step = idx + 1, stage = %spec.name, params = %params, on_failure = ?spec.on_failure, "[DRY RUN] Planned stage");
        }
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("pipeline", &self.pipeline)
            .field("dry_run", &self.dry_run)
            .field("context_keys", &self.context.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn run_guarded(
    stage: &dyn Stage,
    name: &str,
    config: &Value,
    context: Context,
) -> Result<Context, StageError> {
    catch_unwind(AssertUnwindSafe(|| stage.run(config, context))).unwrap_or_else(|payload| {
        Err(StageError::Panicked {
            stage: name.to_string(),
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Execution results attached to a context by a completed run, in order.
pub fn pipeline_results(context: &Context) -> Vec<(String, ExecutionResult)> {
    context
        .get(PIPELINE_RESULTS)
        .and_then(Value::as_object)
        .map(|results| {
            results
                .iter()
                .filter_map(|(name, value)| {
                    serde_json::from_value::<ExecutionResult>(value.clone())
                        .ok()
                        .map(|r| (name.clone(), r))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Names of stages recorded as failed.
pub fn failed_stages(context: &Context) -> Vec<String> {
    pipeline_results(context)
        .into_iter()
        .filter(|(_, r)| !r.is_success())
        .map(|(name, _)| name)
        .collect()
}
