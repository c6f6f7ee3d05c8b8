//! Error types for the stagepipe core library.
//!
//! Uses `thiserror` for public API error types. Configuration problems are
//! fatal at the offending call, resolution problems are fatal only while a
//! pipeline is running, and stage errors are recorded per stage.

use std::path::PathBuf;

/// Errors raised while registering components or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid category '{category}'. Must be one of: {valid}")]
    InvalidCategory { category: String, valid: String },

    #[error("Component name must be a non-empty string (category '{category}')")]
    InvalidName { category: String },

    #[error(
        "Component '{name}' already registered under '{category}'. Pass overwrite=true to replace it."
    )]
    DuplicateName { category: String, name: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors raised when a component cannot be looked up.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("No component '{name}' registered under '{category}'. Available: [{}]", .available.join(", "))]
    NotFound {
        category: String,
        name: String,
        available: Vec<String>,
    },

    #[error("Unknown component category '{category}'")]
    UnknownCategory { category: String },

    #[error("Component '{name}' under '{category}' is not a {expected}")]
    WrongKind {
        category: String,
        name: String,
        expected: &'static str,
    },
}

/// Errors raised inside a stage's `validate` or `run`, or a metric's `compute`.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    #[error("Stage '{stage}' is missing required input '{key}'")]
    MissingInput { stage: String, key: String },

    #[error("Invalid parameters for stage '{stage}': {reason}")]
    InvalidParams { stage: String, reason: String },

    #[error("Stage '{stage}' panicked: {message}")]
    Panicked { stage: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl StageError {
    /// Shorthand for a [`StageError::Failed`].
    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Render a panic payload captured by `catch_unwind` as a message.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
