//! # stagepipe core
//!
//! Contracts shared by every stagepipe crate: the component registry, the
//! [`Stage`] and [`Metric`] traits, the execution [`Context`], error types, and
//! layered configuration loading.

pub mod config;
pub mod context;
pub mod error;
pub mod metric;
pub mod registry;
pub mod stage;

pub use config::{EngineConfig, LoggingConfig, load_domain_config, load_engine_config};
pub use context::Context;
pub use error::{ConfigurationError, ResolutionError, StageError, panic_message};
pub use metric::{Metric, MetricFactory, metric_factory_of};
pub use registry::{Category, Component, ComponentRegistry, SharedRegistry, lock_registry};
pub use stage::{Stage, StageFactory, factory_of};
