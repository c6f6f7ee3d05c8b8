//! Pipeline document and execution result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use stagepipe_core::context::DEFAULT_CONFIG_PATH;
use stagepipe_plugins::PluginDescriptor;
use std::fmt;
use std::time::Duration;

/// A complete pipeline document parsed from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    #[serde(default)]
    pub hydra_overrides: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    /// Enabled stages in configured order.
    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.iter().filter(|s| s.enabled)
    }

    /// `config_path`, falling back to the default base directory.
    pub fn effective_config_path(&self) -> &str {
        self.config_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
    }
}

/// One entry of the `stages` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_enabled() -> bool {
    true
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            params: Map::new(),
            on_failure: FailurePolicy::Abort,
        }
    }
}

/// What the orchestrator does after a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the pipeline.
    #[default]
    Abort,
    /// Record the failure and proceed to the next stage.
    Continue,
}

/// Outcome of a single attempted stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Execution record stored under `pipeline_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: StageStatus,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            status: StageStatus::Success,
            elapsed_seconds: round_secs(elapsed),
            error: None,
        }
    }

    pub fn failed(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            elapsed_seconds: round_secs(elapsed),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "status": self.status.to_string(),
            "elapsed_seconds": self.elapsed_seconds,
        });
        if let (Some(error), Some(obj)) = (&self.error, value.as_object_mut()) {
            obj.insert("error".into(), Value::String(error.clone()));
        }
        value
    }
}

/// Seconds rounded to two decimals.
fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spec_defaults() {
        let spec: StageSpec = serde_yaml::from_str("name: setup_data").unwrap();
        assert_eq!(spec, StageSpec::new("setup_data"));
        assert!(spec.enabled);
        assert!(spec.params.is_empty());
        assert_eq!(spec.on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn test_failure_policy_parse() {
        let spec: StageSpec =
            serde_yaml::from_str("name: x\non_failure: continue\nenabled: false").unwrap();
        assert_eq!(spec.on_failure, FailurePolicy::Continue);
        assert!(!spec.enabled);
        assert!(serde_yaml::from_str::<StageSpec>("name: x\non_failure: retry").is_err());
    }

    #[test]
    fn test_effective_config_path() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.effective_config_path(), "../configs");
        config.config_path = Some("/etc/pipe".into());
        assert_eq!(config.effective_config_path(), "/etc/pipe");
    }

    #[test]
    fn test_enabled_stages_keeps_order() {
        let mut b = StageSpec::new("b");
        b.enabled = false;
        let config = PipelineConfig {
            stages: vec![StageSpec::new("c"), b, StageSpec::new("a")],
            ..Default::default()
        };
        let names: Vec<&str> = config.enabled_stages().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_execution_result_rounding_and_json() {
        let ok = ExecutionResult::success(Duration::from_millis(1234));
        assert_eq!(ok.elapsed_seconds, 1.23);
        assert_eq!(ok.to_json(), json!({"status": "success", "elapsed_seconds": 1.23}));

        let failed = ExecutionResult::failed(Duration::from_millis(5), "boom");
        assert_eq!(failed.elapsed_seconds, 0.01);
        assert_eq!(failed.to_json()["error"], json!("boom"));
        assert!(!failed.is_success());
    }

    #[test]
    fn test_execution_result_roundtrips_from_json() {
        let failed = ExecutionResult::failed(Duration::from_secs(2), "x");
        let back: ExecutionResult = serde_json::from_value(failed.to_json()).unwrap();
        assert_eq!(back, failed);
    }
}
