//! YAML parser and validator for pipeline documents.

use crate::pipeline::types::PipelineConfig;
use stagepipe_core::ConfigurationError;
use std::path::Path;

/// Parse a pipeline document from a YAML string.
///
/// An empty document yields an empty pipeline.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigurationError> {
    if yaml.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }
    let config = serde_yaml::from_str::<PipelineConfig>(yaml).map_err(|e| {
        ConfigurationError::Parse {
            message: e.to_string(),
        }
    })?;
    validate_pipeline(&config)?;
    Ok(config)
}

/// Read and parse a pipeline document from disk.
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig, ConfigurationError> {
    if !path.exists() {
        return Err(ConfigurationError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let yaml = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Parse {
        message: format!("{}: {}", path.display(), e),
    })?;
    parse_pipeline(&yaml)
}

/// Validate a parsed pipeline for structural correctness.
///
/// Checks that every stage has a non-empty name. Duplicate names are allowed;
/// the later stage's result replaces the earlier one in `pipeline_results`.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), ConfigurationError> {
    for (idx, stage) in config.stages.iter().enumerate() {
        if stage.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: format!("Stage #{} has an empty name", idx + 1),
            });
        }
    }
    Ok(())
}
