//! Metric contract for components registered under the `metric` category.

use crate::error::StageError;
use std::sync::Arc;

/// Interface every metric must implement so it can be dispatched by name.
pub trait Metric: Send {
    /// Registry name of the metric.
    fn name(&self) -> &str;

    /// Whether the metric needs reference sequences.
    fn requires_references(&self) -> bool {
        false
    }

    /// Whether the metric is computed per sample (and averaged) rather than
    /// over the whole distribution.
    fn is_per_sample(&self) -> bool {
        false
    }

    /// Compute the metric over generated sequences.
    fn compute(&self, predictions: &[String], references: Option<&[String]>)
    -> Result<f64, StageError>;
}

/// Constructor for metric instances stored in the registry.
pub type MetricFactory = Arc<dyn Fn() -> Box<dyn Metric> + Send + Sync>;

/// Build a [`MetricFactory`] for a `Default`-constructible metric type.
pub fn metric_factory_of<M>() -> MetricFactory
where
    M: Metric + Default + 'static,
{
    Arc::new(|| Box::new(M::default()))
}
