//! Example plugin whose `boom` stage panics.
//!
//! Loaded as a `cdylib`, it shows that a panic inside a plugin is reported as
//! a failed stage instead of aborting the host.

use serde_json::Value;
use stagepipe_core::{ComponentRegistry, Context, Stage, StageError, factory_of};
use stagepipe_plugins::PluginEntryError;

/// Panics whenever it runs.
#[derive(Debug, Default)]
pub struct BoomStage;

impl Stage for BoomStage {
    fn name(&self) -> &str {
        "boom"
    }

    fn validate(&self, _config: &Value, _context: &Context) -> Result<Vec<String>, StageError> {
        Ok(vec![])
    }

    fn run(&self, _config: &Value, _context: Context) -> Result<Context, StageError> {
        panic!("plugin stage blew up")
    }
}

fn register_components(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
    registry.register_stage("boom", factory_of::<BoomStage>())?;
    Ok(())
}

stagepipe_plugins::declare_plugin!(register_components);
