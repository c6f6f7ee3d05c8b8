//! # stagepipe plugins
//!
//! Plugin system for stagepipe. A plugin is a native dynamic library
//! (.so/.dll/.dylib) or an installed package that exports a `register`
//! entry point; loading it invokes that entry point against a
//! [`ComponentRegistry`] so the plugin can add stages, metrics and other
//! components.
//!
//! Plugins run with full host privilege and must be built by the same
//! compiler as the host. Plugin libraries should export their entry point
//! with [`declare_plugin!`], which keeps panics inside the plugin from
//! crossing into the host.

pub mod export;
pub mod loader;
pub mod package;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagepipe_core::{ComponentRegistry, ConfigurationError};
use std::path::PathBuf;

pub use loader::{LibloadingBackend, LoadedModule, ModuleBackend, PluginLoader};
pub use package::PackageIndex;

/// Signature of the `register` symbol every plugin exports.
///
/// ```ignore
/// fn register_components(registry: &mut ComponentRegistry) -> Result<(), PluginEntryError> {
///     registry.register_stage("custom_hello", factory_of::<HelloStage>())?;
///     Ok(())
/// }
///
/// stagepipe_plugins::declare_plugin!(register_components);
/// ```
///
/// A `cdylib` plugin carries its own copy of `tracing` with its own global
/// dispatcher, which the host never installs a subscriber into. Events the
/// plugin emits are dropped unless the plugin sets up its own subscriber.
/// Report outcomes through the returned `Result` and the stage's context.
pub type EntryPoint = fn(&mut ComponentRegistry) -> Result<(), PluginEntryError>;

/// Name of the symbol looked up in plugin libraries.
pub const ENTRY_POINT_SYMBOL: &[u8] = b"register";

/// Prefix of the unit names synthesized for path-loaded plugins.
pub const UNIT_PREFIX: &str = "stagepipe_plugin_";

/// Errors a plugin's entry point may return.
#[derive(Debug, thiserror::Error)]
pub enum PluginEntryError {
    #[error(transparent)]
    Registration(#[from] ConfigurationError),
    #[error("{0}")]
    Other(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Errors from plugin loading.
#[derive(Debug, thiserror::Error)]
pub enum PluginLoadError {
    #[error("Plugin file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Plugin file must be a .{expected} library: {path}")]
    WrongExtension { path: PathBuf, expected: &'static str },

    #[error("Error loading plugin {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Plugin '{unit}' must export a callable 'register' entry point: {message}")]
    MissingEntryPoint { unit: String, message: String },

    #[error("Error in register() of plugin '{unit}': {message}")]
    RegisterFailed { unit: String, message: String },

    #[error("Could not load plugin package '{name}': not installed and not found in {searched} search dir(s)")]
    PackageNotFound { name: String, searched: usize },

    #[error("Plugin descriptor must have a 'path' or 'package' key")]
    InvalidDescriptor,
}

/// One entry of a pipeline document's `plugins` list.
///
/// When both fields are present, `path` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

impl PluginDescriptor {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            package: None,
        }
    }

    pub fn from_package(name: impl Into<String>) -> Self {
        Self {
            path: None,
            package: Some(name.into()),
        }
    }
}

/// Where a loaded unit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOrigin {
    /// Loaded from an explicit library path.
    Path(PathBuf),
    /// Resolved by package name from the in-process index.
    Installed(String),
    /// Resolved by package name from a search directory.
    SearchDir(PathBuf),
}

/// A unit recorded in the loader's loaded-unit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedUnit {
    pub name: String,
    pub origin: UnitOrigin,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_deserialize() {
        let d: PluginDescriptor = serde_json::from_str(r#"{"path": "plugins/libx.so"}"#).unwrap();
        assert_eq!(d, PluginDescriptor::from_path("plugins/libx.so"));
        let d: PluginDescriptor = serde_json::from_str(r#"{"package": "hello"}"#).unwrap();
        assert_eq!(d, PluginDescriptor::from_package("hello"));
        let d: PluginDescriptor = serde_json::from_str("{}").unwrap();
        assert!(d.path.is_none() && d.package.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = PluginLoadError::RegisterFailed {
            unit: "stagepipe_plugin_demo".into(),
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error in register() of plugin 'stagepipe_plugin_demo': boom"
        );
        assert_eq!(
            PluginLoadError::InvalidDescriptor.to_string(),
            "Plugin descriptor must have a 'path' or 'package' key"
        );
    }

    #[test]
    fn test_entry_error_from_configuration() {
        let err: PluginEntryError = ConfigurationError::InvalidName {
            category: "stage".into(),
        }
        .into();
        assert!(matches!(err, PluginEntryError::Registration(_)));
    }
}
