//! `run_command` stage: delegates the stage's work to an external program.
//!
//! Parameters are read from `stage_params.run_command`:
//!
//! | key                | meaning                                                    |
//! |--------------------|------------------------------------------------------------|
//! | `program`          | executable to run (required)                               |
//! | `args`             | list of arguments                                          |
//! | `env`              | map of environment variables                               |
//! | `cwd`              | working directory                                          |
//! | `pass_config_path` | append `--config_path=<config_path>` (default `true`)      |
//! | `pass_overrides`   | append the context's `hydra_overrides` (default `true`)    |
//! | `capture_stdout`   | context key that receives the trimmed stdout               |
//! | `outputs`          | map of context keys to set once the program succeeds       |

use serde_json::{Map, Value};
use stagepipe_core::context::{self, CONFIG_PATH, HYDRA_OVERRIDES};
use stagepipe_core::{Context, Stage, StageError};
use std::process::Command;
use tracing::{debug, info};

pub const NAME: &str = "run_command";

#[derive(Debug, Default)]
pub struct RunCommandStage;

impl RunCommandStage {
    fn params(context: &Context) -> Map<String, Value> {
        context::stage_params(context, NAME)
            .cloned()
            .unwrap_or_default()
    }

    fn build_command(params: &Map<String, Value>, context: &Context) -> Result<Command, StageError> {
        let program = params
            .get("program")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StageError::InvalidParams {
                stage: NAME.into(),
                reason: "missing required param 'program'".into(),
            })?;

        let mut cmd = Command::new(program);

        if let Some(args) = params.get("args") {
            let args = args.as_array().ok_or_else(|| StageError::InvalidParams {
                stage: NAME.into(),
                reason: "'args' must be a list".into(),
            })?;
            cmd.args(args.iter().map(arg_string));
        }

        if flag(params, "pass_config_path") {
            if let Some(path) = context.get(CONFIG_PATH).and_then(Value::as_str) {
                cmd.arg(format!("--config_path={}", path));
            }
        }

        if flag(params, "pass_overrides") {
            if let Some(overrides) = context.get(HYDRA_OVERRIDES).and_then(Value::as_array) {
                cmd.args(overrides.iter().map(arg_string));
            }
        }

        if let Some(env) = params.get("env").and_then(Value::as_object) {
            for (key, value) in env {
                cmd.env(key, arg_string(value));
            }
        }

        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            cmd.current_dir(cwd);
        }

        Ok(cmd)
    }
}

impl Stage for RunCommandStage {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Run an external program as a pipeline stage"
    }

    fn validate(&self, _config: &Value, context: &Context) -> Result<Vec<String>, StageError> {
        let params = Self::params(context);
        let mut issues = Vec::new();
        match params.get("program") {
            Some(Value::String(p)) if !p.is_empty() => {}
            _ => issues.push(format!(
                "Missing required param 'program' in stage_params.{}",
                NAME
            )),
        }
        if params.get("args").is_some_and(|a| !a.is_array()) {
            issues.push("'args' must be a list".to_string());
        }
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            if !std::path::Path::new(cwd).is_dir() {
                issues.push(format!("Working directory not found: {}", cwd));
            }
        }
        Ok(issues)
    }

    fn run(&self, _config: &Value, mut context: Context) -> Result<Context, StageError> {
        let params = Self::params(&context);
        let mut cmd = Self::build_command(&params, &context)?;

        debug!(command = ?cmd, "Spawning stage command");
        let output = cmd.output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(StageError::failed(
                NAME,
                format!("command exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        info!(status = %output.status, "Stage command finished");

        if let Some(key) = params.get("capture_stdout").and_then(Value::as_str) {
            let stdout = String::from_utf8_lossy(&output.stdout);
            context.insert(key.to_string(), Value::String(stdout.trim().to_string()));
        }

        if let Some(outputs) = params.get("outputs").and_then(Value::as_object) {
            for (key, value) in outputs {
                context.insert(key.clone(), value.clone());
            }
        }

        Ok(context)
    }
}

/// Boolean param that defaults to `true`.
fn flag(params: &Map<String, Value>, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(true)
}

fn arg_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
