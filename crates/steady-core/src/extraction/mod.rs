//! Metric extraction from free-form generated text.
//!
//! Extraction is pure: the same text and scenario always produce the same
//! map. A metric that cannot be read is recorded, never fatal.

pub mod patterns;
mod verdict;

pub use patterns::{Normalizer, ValueParseError};
pub use verdict::classify_verdict;

use std::collections::{BTreeMap, BTreeSet};

use crate::scenario::{MetricSpec, Scenario};
use crate::types::Extraction;

/// Extract a single metric. The first pattern that matches decides the outcome.
pub fn extract_metric(raw_text: &str, metric: &MetricSpec) -> Extraction {
    for pattern in &metric.patterns {
        match pattern.apply(raw_text) {
            None => continue,
            Some(Ok(value)) => return Extraction::Found(value),
            Some(Err(e)) => return Extraction::ParseError(e.to_string()),
        }
    }
    Extraction::NotFound
}

/// Extract every declared metric of `scenario` from `raw_text`.
///
/// Returns the per-metric outcomes and the names of metrics that were not
/// found or failed to parse.
pub fn extract(
    raw_text: &str,
    scenario: &Scenario,
) -> (BTreeMap<String, Extraction>, BTreeSet<String>) {
    let mut metrics = BTreeMap::new();
    let mut failed = BTreeSet::new();

    for metric in scenario.metrics() {
        let outcome = extract_metric(raw_text, metric);

        match &outcome {
            Extraction::Found(_) => {}
            Extraction::NotFound => {
                tracing::debug!(
                    scenario = %scenario.key(),
                    metric = %metric.name,
                    "Metric not found in text"
                );
                failed.insert(metric.name.clone());
            }
            Extraction::ParseError(reason) => {
                tracing::debug!(
                    scenario = %scenario.key(),
                    metric = %metric.name,
                    error = %reason,
                    "Metric matched but could not be parsed"
                );
                failed.insert(metric.name.clone());
            }
        }

        metrics.insert(metric.name.clone(), outcome);
    }

    (metrics, failed)
}
