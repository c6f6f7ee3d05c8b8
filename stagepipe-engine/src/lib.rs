//! # stagepipe engine
//!
//! Parses pipeline documents and runs their stages in order over a shared
//! context. Ships the built-in stages and metrics that the bootstrap phase
//! registers.

pub mod builtins;
pub mod error;
pub mod orchestrator;
pub mod pipeline;

pub use error::PipelineError;
pub use orchestrator::{PipelineOrchestrator, StageIssues, failed_stages, pipeline_results};
pub use pipeline::{
    ExecutionResult, FailurePolicy, PipelineConfig, StageSpec, StageStatus, load_pipeline,
    parse_pipeline,
};
