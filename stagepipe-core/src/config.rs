//! Configuration loading for stagepipe.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> workspace config -> environment.
//! Engine settings are read from `~/.config/stagepipe/config.toml` and/or
//! `.stagepipe/config.toml` in the workspace directory. Domain configuration
//! (the opaque document handed to every stage) is loaded separately by
//! [`load_domain_config`].

use crate::error::ConfigurationError;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Engine-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pipeline document used when the CLI is not given `--pipeline`.
    pub default_pipeline: Option<PathBuf>,
    /// Extra directories searched for plugin libraries.
    pub plugin_dirs: Vec<PathBuf>,
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive for the stderr layer.
    pub level: String,
    /// Whether to write JSON logs to the data directory.
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: true,
        }
    }
}

/// Project directories for stagepipe (config, data, logs).
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "stagepipe", "stagepipe")
}

/// Load engine configuration from all layers.
pub fn load_engine_config(workspace: Option<&Path>) -> Result<EngineConfig, ConfigurationError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".stagepipe").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // STAGEPIPE_LOGGING__LEVEL, STAGEPIPE_PLUGIN_DIRS, ...
    figment = figment.merge(Env::prefixed("STAGEPIPE_").split("__"));

    figment.extract().map_err(|e| ConfigurationError::Parse {
        message: e.to_string(),
    })
}

/// Load a domain configuration file as an opaque JSON value.
///
/// The format is chosen by extension (`toml`, `yaml`/`yml`, `json`).
/// `STAGEPIPE_DOMAIN_*` environment variables are merged on top, with `__`
/// separating nested keys.
pub fn load_domain_config(path: &Path) -> Result<Value, ConfigurationError> {
    if !path.exists() {
        return Err(ConfigurationError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let figment = match ext.as_str() {
        "toml" => Figment::from(Toml::file(path)),
        "yaml" | "yml" => Figment::from(Yaml::file(path)),
        "json" => Figment::from(Json::file(path)),
        other => {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "Unsupported config format '{}' for {}",
                    other,
                    path.display()
                ),
            });
        }
    };

    figment
        .merge(Env::prefixed("STAGEPIPE_DOMAIN_").split("__"))
        .extract::<Value>()
        .map_err(|e| ConfigurationError::Parse {
            message: e.to_string(),
        })
}
