//! Pipeline documents: types and YAML parsing.

pub mod parser;
pub mod types;

pub use parser::{load_pipeline, parse_pipeline, validate_pipeline};
pub use types::{ExecutionResult, FailurePolicy, PipelineConfig, StageSpec, StageStatus};
