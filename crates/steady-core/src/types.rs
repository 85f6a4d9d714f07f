//! Core types for consistency validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::extraction;
use crate::scenario::Scenario;

/// Sentinel recorded in `RunResult::extraction_errors` when the generation
/// call itself failed.
pub const CALL_FAILED: &str = "call_failed";

/// The three canonical metric classes. The class drives both parsing and
/// tolerance lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricClass {
    /// Currency-formatted values, normalized to absolute dollars
    DollarAmounts,
    /// Values followed by `%` or the word "percent"
    Percentages,
    /// Durations, normalized to months
    TimePeriods,
}

impl MetricClass {
    /// All classes in declaration order.
    pub const ALL: [MetricClass; 3] = [
        MetricClass::DollarAmounts,
        MetricClass::Percentages,
        MetricClass::TimePeriods,
    ];

    /// Wire name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricClass::DollarAmounts => "dollar_amounts",
            MetricClass::Percentages => "percentages",
            MetricClass::TimePeriods => "time_periods",
        }
    }
}

impl fmt::Display for MetricClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of extracting one metric from one run's text.
///
/// `NotFound` means no declared pattern matched. `ParseError` means a
/// pattern matched but the captured text could not be normalized to a
/// number. Both are recorded, neither is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Extraction {
    Found(f64),
    NotFound,
    ParseError(String),
}

impl Extraction {
    /// The extracted value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            Extraction::Found(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Extraction::Found(_))
    }
}

/// Kind of generation call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFailureKind {
    RateLimited,
    Timeout,
    ServiceError,
}

impl fmt::Display for CallFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallFailureKind::RateLimited => "rate limited",
            CallFailureKind::Timeout => "timeout",
            CallFailureKind::ServiceError => "service error",
        };
        f.write_str(s)
    }
}

/// A generation call failure, captured on the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    pub kind: CallFailureKind,
    pub message: String,
}

impl CallFailure {
    pub fn new(kind: CallFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The go/no-go recommendation a run ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Proceed,
    ProceedWithCaution,
    DoNotProceed,
    Unclear,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Proceed => "PROCEED",
            Verdict::ProceedWithCaution => "PROCEED_WITH_CAUTION",
            Verdict::DoNotProceed => "DO_NOT_PROCEED",
            Verdict::Unclear => "UNCLEAR",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one orchestrated generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// 1-based logical position of the run, independent of completion order
    pub run_index: usize,

    /// Raw generated text (empty when the call failed)
    pub raw_text: String,

    /// Extraction outcome per declared metric
    pub metrics: BTreeMap<String, Extraction>,

    /// Metrics that were not found or failed to parse, plus
    /// [`CALL_FAILED`] when the call failed
    pub extraction_errors: BTreeSet<String>,

    /// Recommendation classified from the text
    pub verdict: Verdict,

    /// Set when the generation call failed
    pub call_failure: Option<CallFailure>,
}

impl RunResult {
    /// Build a run result by extracting every declared metric from `raw_text`.
    pub fn from_text(run_index: usize, raw_text: impl Into<String>, scenario: &Scenario) -> Self {
        let raw_text = raw_text.into();
        let (metrics, extraction_errors) = extraction::extract(&raw_text, scenario);
        let verdict = extraction::classify_verdict(&raw_text);

        Self {
            run_index,
            raw_text,
            metrics,
            extraction_errors,
            verdict,
            call_failure: None,
        }
    }

    /// Build the placeholder result for a failed call.
    pub fn failed(run_index: usize, failure: CallFailure, scenario: &Scenario) -> Self {
        let metrics: BTreeMap<String, Extraction> = scenario
            .metrics()
            .iter()
            .map(|m| (m.name.clone(), Extraction::NotFound))
            .collect();

        let mut extraction_errors: BTreeSet<String> = metrics.keys().cloned().collect();
        extraction_errors.insert(CALL_FAILED.to_string());

        Self {
            run_index,
            raw_text: String::new(),
            metrics,
            extraction_errors,
            verdict: Verdict::Unclear,
            call_failure: Some(failure),
        }
    }

    /// Value of a metric in this run, if it was found.
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).and_then(Extraction::value)
    }

    pub fn is_failed(&self) -> bool {
        self.call_failure.is_some()
    }
}

/// Spread of one metric across runs. Only produced for metrics with at
/// least two observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceReport {
    pub metric: String,
    pub class: MetricClass,

    /// Observed values in run order
    pub values: Vec<f64>,

    pub min_value: f64,
    pub max_value: f64,

    /// `(max - min) / max(|min|, epsilon) * 100`
    pub percent_variance: f64,

    /// Tolerance (percent) of the metric's class
    pub tolerance: f64,

    pub within_tolerance: bool,

    /// Largest percent deviation from the scenario baseline, when one is declared
    pub baseline_deviation: Option<f64>,
}

impl VarianceReport {
    /// Variance expressed as a multiple of the class tolerance.
    pub fn tolerance_ratio(&self) -> f64 {
        if self.tolerance > 0.0 {
            self.percent_variance / self.tolerance
        } else if self.percent_variance == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

/// Aggregate score. `Indeterminate` when no metric reached the minimum
/// sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    Determinate(u8),
    Indeterminate,
}

impl Score {
    /// Numeric value; indeterminate scores report 0.
    pub fn value(&self) -> u8 {
        match self {
            Score::Determinate(v) => *v,
            Score::Indeterminate => 0,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Score::Indeterminate)
    }
}

/// Readiness band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyStatus {
    ProductionReady,
    NeedsTuning,
    NeedsPromptEngineering,
    NotReady,
    Indeterminate,
}

impl ConsistencyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConsistencyStatus::ProductionReady => "PRODUCTION_READY",
            ConsistencyStatus::NeedsTuning => "NEEDS_TUNING",
            ConsistencyStatus::NeedsPromptEngineering => "NEEDS_PROMPT_ENGINEERING",
            ConsistencyStatus::NotReady => "NOT_READY",
            ConsistencyStatus::Indeterminate => "INDETERMINATE",
        }
    }
}

impl fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the runs' verdicts line up. Failed runs are not counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictAgreement {
    /// Most common verdict (ties go to the earlier variant)
    pub majority: Option<Verdict>,

    /// Runs that share the majority verdict
    pub agreeing: usize,

    /// Runs whose verdict was considered
    pub considered: usize,

    pub counts: BTreeMap<Verdict, usize>,
}

impl VerdictAgreement {
    pub fn from_runs(runs: &[RunResult]) -> Self {
        let mut counts = BTreeMap::new();
        for run in runs.iter().filter(|r| !r.is_failed()) {
            *counts.entry(run.verdict).or_insert(0) += 1;
        }

        let mut majority = None;
        let mut agreeing = 0;
        for (verdict, count) in &counts {
            if *count > agreeing {
                majority = Some(*verdict);
                agreeing = *count;
            }
        }

        Self {
            majority,
            agreeing,
            considered: counts.values().sum(),
            counts,
        }
    }

    /// All considered runs reached the same verdict.
    pub fn is_unanimous(&self) -> bool {
        self.counts.len() == 1
    }

    /// At least two different verdicts were reached.
    pub fn is_split(&self) -> bool {
        self.counts.len() > 1
    }

    /// `PROCEED ×2, PROCEED_WITH_CAUTION ×1`, most common first.
    pub fn summary(&self) -> String {
        let mut entries: Vec<(&Verdict, &usize)> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        entries
            .iter()
            .map(|(verdict, count)| format!("{} ×{}", verdict, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
