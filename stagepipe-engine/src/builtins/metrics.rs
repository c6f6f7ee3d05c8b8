//! Built-in sequence metrics.

use stagepipe_core::{Metric, StageError};
use std::collections::HashSet;

/// Average sequence length in characters.
#[derive(Debug, Default)]
pub struct MeanLength;

impl Metric for MeanLength {
    fn name(&self) -> &str {
        "mean_length"
    }

    fn is_per_sample(&self) -> bool {
        true
    }

    fn compute(&self, predictions: &[String], _references: Option<&[String]>) -> Result<f64, StageError> {
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let total: usize = predictions.iter().map(|s| s.chars().count()).sum();
        Ok(total as f64 / predictions.len() as f64)
    }
}

/// Fraction of distinct sequences among the predictions.
#[derive(Debug, Default)]
pub struct Uniqueness;

impl Metric for Uniqueness {
    fn name(&self) -> &str {
        "uniqueness"
    }

    fn compute(&self, predictions: &[String], _references: Option<&[String]>) -> Result<f64, StageError> {
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let distinct: HashSet<&str> = predictions.iter().map(String::as_str).collect();
        Ok(distinct.len() as f64 / predictions.len() as f64)
    }
}

/// Fraction of predictions that do not occur in the reference set.
#[derive(Debug, Default)]
pub struct Novelty;

impl Metric for Novelty {
    fn name(&self) -> &str {
        "novelty"
    }

    fn requires_references(&self) -> bool {
        true
    }

    fn compute(&self, predictions: &[String], references: Option<&[String]>) -> Result<f64, StageError> {
        let references = references.ok_or_else(|| StageError::InvalidParams {
            stage: "evaluate_metrics".into(),
            reason: "metric 'novelty' requires reference sequences".into(),
        })?;
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let known: HashSet<&str> = references.iter().map(String::as_str).collect();
        let novel = predictions
            .iter()
            .filter(|p| !known.contains(p.as_str()))
            .count();
        Ok(novel as f64 / predictions.len() as f64)
    }
}
