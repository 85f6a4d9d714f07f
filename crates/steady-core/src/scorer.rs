//! Consistency scoring.
//!
//! Variance is measured per metric across runs, then the worst metric,
//! expressed as a multiple of its class tolerance, decides the score. The
//! mapping from that ratio to 0-100 lives in [`ScoreBands`], an immutable
//! value passed in by the caller.
//!
//! ## Default bands
//!
//! | tolerance ratio `r` | score                              |
//! |---------------------|------------------------------------|
//! | `r <= 1.0`          | `100 - 5r` (95..=100)              |
//! | `1.0 < r <= 2.5`    | linear from 94 down to 70          |
//! | `r > 2.5`           | `69 - 10(r - 2.5)`, floored at 10  |
//!
//! Scores are truncated to integers, so the mapping is non-increasing in `r`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scenario::{MetricSpec, Scenario};
use crate::types::{ConsistencyStatus, RunResult, Score, VarianceReport};
use crate::ConfigurationError;

/// Denominator guard for relative variance.
pub const EPSILON: f64 = 1e-9;

/// Observations a metric needs before its variance is scored.
pub const MIN_OBSERVATIONS: usize = 2;

/// Score bands and status thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreBands {
    /// Ratio at which the top band ends
    pub top_ratio: f64,
    /// Ratio at which the middle band ends
    pub mid_ratio: f64,
    /// Score at `top_ratio`
    pub top_floor: u8,
    /// Score at `mid_ratio`
    pub mid_floor: u8,
    /// Points lost per unit of ratio beyond `mid_ratio`
    pub low_slope: f64,
    /// Lowest determinate score
    pub min_score: u8,

    /// Minimum score for PRODUCTION_READY
    pub production_ready: u8,
    /// Minimum score for NEEDS_TUNING
    pub needs_tuning: u8,
    /// Minimum score for NEEDS_PROMPT_ENGINEERING
    pub needs_engineering: u8,
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            top_ratio: 1.0,
            mid_ratio: 2.5,
            top_floor: 95,
            mid_floor: 70,
            low_slope: 10.0,
            min_score: 10,
            production_ready: 95,
            needs_tuning: 85,
            needs_engineering: 70,
        }
    }
}

impl ScoreBands {
    /// Check that the bands describe a non-increasing mapping.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: &str| Err(ConfigurationError::InvalidBands(msg.to_string()));

        if !(self.top_ratio.is_finite() && self.top_ratio > 0.0) {
            return invalid("top_ratio must be a positive number");
        }
        if !(self.mid_ratio.is_finite() && self.mid_ratio > self.top_ratio) {
            return invalid("mid_ratio must be greater than top_ratio");
        }
        if self.top_floor > 100 || self.mid_floor >= self.top_floor {
            return invalid("expected 100 >= top_floor > mid_floor");
        }
        if self.min_score >= self.mid_floor {
            return invalid("min_score must be below mid_floor");
        }
        if !(self.low_slope.is_finite() && self.low_slope >= 0.0) {
            return invalid("low_slope must be a non-negative number");
        }
        if !(self.production_ready >= self.needs_tuning
            && self.needs_tuning >= self.needs_engineering)
        {
            return invalid("status thresholds must be non-increasing");
        }
        Ok(())
    }

    /// Map a tolerance ratio to a 0-100 score.
    pub fn score_for_ratio(&self, ratio: f64) -> u8 {
        if ratio.is_nan() || ratio.is_infinite() {
            return self.min_score;
        }

        let r = ratio.max(0.0);
        let top = f64::from(self.top_floor);
        let mid = f64::from(self.mid_floor);

        let raw = if r <= self.top_ratio {
            100.0 - (100.0 - top) * (r / self.top_ratio)
        } else if r <= self.mid_ratio {
            let start = top - 1.0;
            let t = (r - self.top_ratio) / (self.mid_ratio - self.top_ratio);
            start - (start - mid) * t
        } else {
            let start = mid - 1.0;
            (start - self.low_slope * (r - self.mid_ratio)).max(f64::from(self.min_score))
        };

        raw.floor().clamp(0.0, 100.0) as u8
    }

    pub fn status_for(&self, score: Score) -> ConsistencyStatus {
        match score {
            Score::Indeterminate => ConsistencyStatus::Indeterminate,
            Score::Determinate(s) if s >= self.production_ready => {
                ConsistencyStatus::ProductionReady
            }
            Score::Determinate(s) if s >= self.needs_tuning => ConsistencyStatus::NeedsTuning,
            Score::Determinate(s) if s >= self.needs_engineering => {
                ConsistencyStatus::NeedsPromptEngineering
            }
            Score::Determinate(_) => ConsistencyStatus::NotReady,
        }
    }
}

/// Output of [`score`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scoring {
    pub score: Score,
    pub status: ConsistencyStatus,

    /// One report per metric with enough observations, in declaration order
    pub variance_reports: Vec<VarianceReport>,

    /// Largest percent variance (0 when nothing was scored)
    pub max_variance: f64,

    /// Largest variance-to-tolerance ratio (0 when nothing was scored)
    pub max_tolerance_ratio: f64,

    /// Number of runs each declared metric was found in
    pub observations: BTreeMap<String, usize>,
}

impl Scoring {
    /// Metrics found in no run at all, in declaration order.
    pub fn unobserved_metrics<'a>(&'a self, scenario: &'a Scenario) -> Vec<&'a str> {
        self.metrics_with(scenario, |n| n == 0)
    }

    /// Metrics found in exactly one run, in declaration order.
    pub fn single_observation_metrics<'a>(&'a self, scenario: &'a Scenario) -> Vec<&'a str> {
        self.metrics_with(scenario, |n| n > 0 && n < MIN_OBSERVATIONS)
    }

    fn metrics_with<'a>(&self, scenario: &'a Scenario, keep: impl Fn(usize) -> bool) -> Vec<&'a str> {
        scenario
            .metrics()
            .iter()
            .filter(|m| keep(self.observations.get(&m.name).copied().unwrap_or(0)))
            .map(|m| m.name.as_str())
            .collect()
    }
}

/// Values of one metric across runs, in run order.
struct MetricSeries<'a> {
    spec: &'a MetricSpec,
    values: Vec<f64>,
}

impl<'a> MetricSeries<'a> {
    fn collect(spec: &'a MetricSpec, runs: &[&RunResult]) -> Self {
        let values = runs.iter().filter_map(|r| r.value(&spec.name)).collect();
        Self { spec, values }
    }

    fn report(&self, tolerance: f64) -> VarianceReport {
        let min_value = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max_value = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let percent_variance = percent_variance(min_value, max_value);

        let baseline_deviation = self.spec.baseline.map(|baseline| {
            let denom = baseline.abs().max(EPSILON);
            self.values
                .iter()
                .map(|v| (v - baseline).abs() / denom * 100.0)
                .fold(0.0, f64::max)
        });

        VarianceReport {
            metric: self.spec.name.clone(),
            class: self.spec.class,
            values: self.values.clone(),
            min_value,
            max_value,
            percent_variance,
            tolerance,
            within_tolerance: percent_variance <= tolerance,
            baseline_deviation,
        }
    }
}

/// `(max - min) / max(|min|, EPSILON) * 100`
pub fn percent_variance(min_value: f64, max_value: f64) -> f64 {
    (max_value - min_value) / min_value.abs().max(EPSILON) * 100.0
}

/// Score a batch of runs against a scenario.
///
/// Pure and deterministic: the same runs always produce the same scoring.
/// Missing data never errors; it only lowers what can be scored.
pub fn score(runs: &[RunResult], scenario: &Scenario, bands: &ScoreBands) -> Scoring {
    let mut ordered: Vec<&RunResult> = runs.iter().collect();
    ordered.sort_by_key(|r| r.run_index);

    let mut variance_reports = Vec::new();
    let mut observations = BTreeMap::new();

    for spec in scenario.metrics() {
        let series = MetricSeries::collect(spec, &ordered);
        observations.insert(spec.name.clone(), series.values.len());

        if series.values.len() < MIN_OBSERVATIONS {
            continue;
        }

        let tolerance = scenario.tolerance_for(spec.class).unwrap_or(0.0);
        variance_reports.push(series.report(tolerance));
    }

    let max_variance = variance_reports
        .iter()
        .map(|r| r.percent_variance)
        .fold(0.0, f64::max);
    let max_tolerance_ratio = variance_reports
        .iter()
        .map(VarianceReport::tolerance_ratio)
        .fold(0.0, f64::max);

    let score = if variance_reports.is_empty() {
        Score::Indeterminate
    } else {
        Score::Determinate(bands.score_for_ratio(max_tolerance_ratio))
    };

    tracing::debug!(
        scenario = %scenario.key(),
        scored_metrics = variance_reports.len(),
        max_variance,
        max_tolerance_ratio,
        score = ?score,
        "Scored runs"
    );

    Scoring {
        score,
        status: bands.status_for(score),
        variance_reports,
        max_variance,
        max_tolerance_ratio,
        observations,
    }
}
