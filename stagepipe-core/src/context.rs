//! The execution context threaded through every stage.
//!
//! The context is a schema-less, insertion-ordered map. Stages communicate by
//! convention over well-known keys; the orchestrator only ever writes the
//! reserved keys below.

use serde_json::{Map, Value};

/// Untyped, ordered key/value state passed stage to stage by value.
pub type Context = Map<String, Value>;

/// Base configuration directory, seeded before the first stage runs.
pub const CONFIG_PATH: &str = "config_path";
/// Per-stage parameter sub-maps, keyed by stage name.
pub const STAGE_PARAMS: &str = "stage_params";
/// Configuration override tokens, present only when configured.
pub const HYDRA_OVERRIDES: &str = "hydra_overrides";
/// Execution summary, present only after a completed non-dry run.
pub const PIPELINE_RESULTS: &str = "pipeline_results";

/// Context key the CLI uses for `--checkpoint`.
pub const CHECKPOINT_PATH: &str = "checkpoint_path";
/// Context key the CLI uses for `--num-gpus`.
pub const NUM_GPUS: &str = "num_gpus";

/// Default value of [`CONFIG_PATH`] when the pipeline document omits it.
pub const DEFAULT_CONFIG_PATH: &str = "../configs";

/// Look up the parameters configured for `stage` under [`STAGE_PARAMS`].
pub fn stage_params<'a>(context: &'a Context, stage: &str) -> Option<&'a Map<String, Value>> {
    context
        .get(STAGE_PARAMS)
        .and_then(Value::as_object)
        .and_then(|params| params.get(stage))
        .and_then(Value::as_object)
}
