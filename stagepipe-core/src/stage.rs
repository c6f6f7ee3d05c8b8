//! The stage capability contract.
//!
//! Every executable unit, built in or supplied by a plugin, implements
//! [`Stage`] and is registered under the `stage` category as a factory. The
//! orchestrator asks the factory for a fresh instance on every resolution, so a
//! stage must not expect state to survive between its own `validate` and `run`.

use crate::context::Context;
use crate::error::StageError;
use serde_json::Value;
use std::sync::Arc;

/// Trait that all pipeline stages must implement.
pub trait Stage: Send {
    /// Stable identifier; matches the registry key the stage is found under.
    fn name(&self) -> &str;

    /// Human-readable description of what this stage does.
    fn description(&self) -> &str {
        ""
    }

    /// Check preconditions before the pipeline runs.
    ///
    /// Returns zero or more human-readable issues. Expected missing
    /// preconditions are reported as issues, not errors; an `Err` is treated
    /// as an internal failure and turned into a single issue by the caller.
    fn validate(&self, config: &Value, context: &Context) -> Result<Vec<String>, StageError>;

    /// Perform the stage's work.
    ///
    /// The returned context replaces the current one wholesale. Returning an
    /// incomplete map truncates every key downstream stages would have seen.
    fn run(&self, config: &Value, context: Context) -> Result<Context, StageError>;
}

/// Constructor for stage instances stored in the registry.
pub type StageFactory = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Build a [`StageFactory`] for a `Default`-constructible stage type.
pub fn factory_of<S>() -> StageFactory
where
    S: Stage + Default + 'static,
{
    Arc::new(|| Box::new(S::default()))
}
