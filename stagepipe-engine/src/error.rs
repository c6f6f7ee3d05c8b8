//! Top-level error type for pipeline runs.
//!
//! Stage failures are never surfaced here; they are recorded per stage in the
//! execution results. A `PipelineError` means the run could not start.

use stagepipe_core::ConfigurationError;
use stagepipe_plugins::PluginLoadError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Plugin(#[from] PluginLoadError),
}
