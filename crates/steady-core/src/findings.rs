//! Findings and recommendations.
//!
//! Findings describe what was observed, in a fixed order:
//!
//! 1. out-of-tolerance metrics, largest variance first
//! 2. the insufficient-sample notice when the score is indeterminate
//! 3. failed generation calls
//! 4. extraction problems (metrics never found, found once, missed or
//!    unparseable in a particular run)
//! 5. verdict agreement
//!
//! Recommendations follow from the score band, the metric class that
//! dominates the variance, and any verdict disagreement.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::format;
use crate::scenario::Scenario;
use crate::scorer::{ScoreBands, Scoring, MIN_OBSERVATIONS};
use crate::types::{
    Extraction, MetricClass, RunResult, Score, VarianceReport, Verdict, VerdictAgreement,
};

/// Share of the out-of-tolerance spread a class must exceed to dominate.
const DOMINANCE_SHARE: f64 = 0.5;

/// Builds findings and recommendations for one batch of runs.
pub struct FindingGenerator<'a> {
    scenario: &'a Scenario,
    bands: &'a ScoreBands,
}

impl<'a> FindingGenerator<'a> {
    pub fn new(scenario: &'a Scenario, bands: &'a ScoreBands) -> Self {
        Self { scenario, bands }
    }

    /// Returns `(findings, recommendations)`.
    pub fn build(
        &self,
        scoring: &Scoring,
        runs: &[RunResult],
        agreement: &VerdictAgreement,
        temperature: f64,
    ) -> (Vec<String>, Vec<String>) {
        let findings = self.findings(scoring, runs, agreement);
        let recommendations = self.recommendations(scoring, runs, agreement, temperature);
        (findings, recommendations)
    }

    fn findings(
        &self,
        scoring: &Scoring,
        runs: &[RunResult],
        agreement: &VerdictAgreement,
    ) -> Vec<String> {
        let mut findings = Vec::new();

        for report in self.out_of_tolerance(&scoring.variance_reports) {
            findings.push(self.variance_finding(report));
        }

        if scoring.score.is_indeterminate() {
            findings.push(format!(
                "Insufficient samples: no metric was found in at least {} runs, so variance could not be scored",
                MIN_OBSERVATIONS
            ));
        }

        let mut ordered: Vec<&RunResult> = runs.iter().collect();
        ordered.sort_by_key(|r| r.run_index);

        for run in &ordered {
            if let Some(failure) = &run.call_failure {
                findings.push(format!(
                    "Run {} failed ({}): {}; its metrics were not extracted",
                    run.run_index, failure.kind, failure.message
                ));
            }
        }

        for metric in scoring.unobserved_metrics(self.scenario) {
            findings.push(format!(
                "{} was not found in any run; check its extraction patterns",
                metric
            ));
        }

        if runs.len() >= MIN_OBSERVATIONS {
            for metric in scoring.single_observation_metrics(self.scenario) {
                findings.push(format!(
                    "{} was found in only 1 of {} runs, so its variance was not scored",
                    metric,
                    runs.len()
                ));
            }
        }

        for run in ordered.iter().filter(|r| !r.is_failed()) {
            for spec in self.scenario.metrics() {
                let observed = scoring.observations.get(&spec.name).copied().unwrap_or(0);
                match run.metrics.get(&spec.name) {
                    Some(Extraction::ParseError(reason)) => findings.push(format!(
                        "Run {}: {} matched but could not be parsed ({})",
                        run.run_index, spec.name, reason
                    )),
                    Some(Extraction::NotFound) | None if observed > 0 => findings.push(format!(
                        "Run {}: {} was not found in the response",
                        run.run_index, spec.name
                    )),
                    _ => {}
                }
            }
        }

        if agreement.is_split() {
            findings.push(format!(
                "Recommendation varies across runs: {}",
                agreement.summary()
            ));
        } else if agreement.is_unanimous() && agreement.considered >= MIN_OBSERVATIONS {
            if let Some(verdict) = agreement.majority.filter(|v| *v != Verdict::Unclear) {
                findings.push(format!(
                    "Final recommendation is consistent across all {} runs ({})",
                    agreement.considered, verdict
                ));
            }
        }

        findings
    }

    fn recommendations(
        &self,
        scoring: &Scoring,
        runs: &[RunResult],
        agreement: &VerdictAgreement,
        temperature: f64,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        match scoring.score {
            Score::Indeterminate => {
                recommendations.push(format!(
                    "Collect at least {} successful runs so variance can be measured",
                    MIN_OBSERVATIONS
                ));
                if !scoring.unobserved_metrics(self.scenario).is_empty() {
                    recommendations.push(
                        "Align the metric patterns with the response format, or ask for the metrics under fixed labels"
                            .to_string(),
                    );
                }
            }
            Score::Determinate(score) => {
                if score >= self.bands.production_ready {
                    recommendations.push(format!(
                        "Outputs are consistent enough for production use at temperature {:.1}",
                        temperature
                    ));
                }
                if score < self.bands.production_ready {
                    recommendations.push(
                        "Add a structured JSON output format to the prompt for more consistent parsing"
                            .to_string(),
                    );
                }
                if score < self.bands.needs_tuning {
                    if temperature > 0.0 {
                        recommendations.push(format!(
                            "Reduce temperature from {:.1} to 0.0 for more deterministic outputs",
                            temperature
                        ));
                    } else {
                        recommendations.push(
                            "Temperature is already 0.0; pin intermediate values in the prompt instead"
                                .to_string(),
                        );
                    }
                }
                if score < self.bands.needs_engineering {
                    recommendations
                        .push("Add explicit calculation validation steps to the prompt".to_string());
                    recommendations.push(
                        "Break the analysis into smaller, focused prompts".to_string(),
                    );
                }
            }
        }

        if let Some(class) = dominant_class(&scoring.variance_reports) {
            recommendations.push(class_suggestion(class).to_string());
        }

        if agreement.is_split() {
            recommendations.push(
                "Provide clearer decision criteria for the recommendation in the prompt".to_string(),
            );
        }

        let failed = runs.iter().filter(|r| r.is_failed()).count();
        if failed > 0 {
            recommendations.push(format!(
                "{} of {} generation calls failed; rerun or raise the call timeout and retry budget before relying on this score",
                failed,
                runs.len()
            ));
        }

        recommendations
    }

    /// Out-of-tolerance reports, largest variance first, ties in declaration order.
    fn out_of_tolerance<'r>(&self, reports: &'r [VarianceReport]) -> Vec<&'r VarianceReport> {
        let mut out: Vec<&VarianceReport> = reports.iter().filter(|r| !r.within_tolerance).collect();
        out.sort_by(|a, b| {
            b.percent_variance
                .total_cmp(&a.percent_variance)
                .then_with(|| {
                    self.scenario
                        .metric_position(&a.metric)
                        .cmp(&self.scenario.metric_position(&b.metric))
                })
        });
        out
    }

    fn variance_finding(&self, report: &VarianceReport) -> String {
        let mut text = format!(
            "{} varies by {:.1}% across {} runs (range {}–{}, tolerance {:.1}% for {})",
            report.metric,
            report.percent_variance,
            report.values.len(),
            format::compact(report.class, report.min_value),
            format::compact(report.class, report.max_value),
            report.tolerance,
            report.class,
        );
        if let Some(deviation) = report.baseline_deviation {
            text.push_str(&format!("; up to {:.1}% off the expected value", deviation));
        }
        text
    }
}

/// The class holding more than half of the out-of-tolerance spread, if any.
fn dominant_class(reports: &[VarianceReport]) -> Option<MetricClass> {
    let mut by_class: BTreeMap<MetricClass, f64> = BTreeMap::new();
    for report in reports.iter().filter(|r| !r.within_tolerance) {
        // Cap infinite ratios (zero tolerance) so the shares stay finite.
        let ratio = report.tolerance_ratio().min(f64::MAX / 8.0);
        *by_class.entry(report.class).or_insert(0.0) += ratio;
    }

    let total: f64 = by_class.values().sum();
    if total <= 0.0 {
        return None;
    }

    by_class
        .into_iter()
        .filter(|(_, spread)| spread / total > DOMINANCE_SHARE)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(class, _)| class)
}

fn class_suggestion(class: MetricClass) -> &'static str {
    match class {
        MetricClass::DollarAmounts => {
            "Dollar amounts drive most of the variance; list every input figure and require each total to be computed from them step by step"
        }
        MetricClass::Percentages => {
            "Percentages drive most of the variance; state the ROI formula and time horizon explicitly in the prompt"
        }
        MetricClass::TimePeriods => {
            "Time periods drive most of the variance; define the payback formula and require the result in months"
        }
    }
}
