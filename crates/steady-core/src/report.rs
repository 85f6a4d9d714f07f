//! The consistency report and its tabular/plain-text renderings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::findings::FindingGenerator;
use crate::format;
use crate::scenario::Scenario;
use crate::scorer::{self, ScoreBands};
use crate::types::{
    ConsistencyStatus, Extraction, RunResult, Score, VarianceReport, VerdictAgreement,
};
use crate::{validate_temperature, ConfigurationError};

/// Cell shown for a metric that was not found.
pub const NOT_FOUND_CELL: &str = "N/A";

/// Cell shown for a metric that matched but could not be parsed.
pub const PARSE_ERROR_CELL: &str = "ERR";

/// Cell shown in the verdict row for a failed call.
pub const FAILED_CELL: &str = "FAILED";

/// Everything learned from one validation batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    /// Scenario name
    pub scenario: String,
    pub scenario_key: String,
    pub temperature: f64,
    pub run_count: usize,

    /// Runs in run order
    pub run_results: Vec<RunResult>,

    pub variance_reports: Vec<VarianceReport>,

    /// 0-100; 0 when indeterminate
    pub score: u8,
    pub status: ConsistencyStatus,
    pub status_label: String,

    pub max_variance: f64,
    pub max_tolerance_ratio: f64,
    pub verdict_agreement: VerdictAgreement,

    pub findings: Vec<String>,
    pub recommendations: Vec<String>,

    pub generated_at: DateTime<Utc>,
}

impl ConsistencyReport {
    /// Score the runs and assemble the report.
    ///
    /// Fails only when there are no runs or the temperature is invalid;
    /// missing or malformed data in the runs is reported as findings.
    pub fn build(
        scenario: &Scenario,
        temperature: f64,
        mut run_results: Vec<RunResult>,
        bands: &ScoreBands,
    ) -> Result<Self, ConfigurationError> {
        if run_results.is_empty() {
            return Err(ConfigurationError::NoRuns);
        }
        validate_temperature(temperature)?;
        bands.validate()?;

        run_results.sort_by_key(|r| r.run_index);

        let scoring = scorer::score(&run_results, scenario, bands);
        let verdict_agreement = VerdictAgreement::from_runs(&run_results);
        let (findings, recommendations) = FindingGenerator::new(scenario, bands).build(
            &scoring,
            &run_results,
            &verdict_agreement,
            temperature,
        );

        Ok(Self {
            scenario: scenario.name().to_string(),
            scenario_key: scenario.key().to_string(),
            temperature,
            run_count: run_results.len(),
            run_results,
            variance_reports: scoring.variance_reports,
            score: scoring.score.value(),
            status: scoring.status,
            status_label: scoring.status.label().to_string(),
            max_variance: scoring.max_variance,
            max_tolerance_ratio: scoring.max_tolerance_ratio,
            verdict_agreement,
            findings,
            recommendations,
            generated_at: Utc::now(),
        })
    }

    pub fn is_indeterminate(&self) -> bool {
        self.status == ConsistencyStatus::Indeterminate
    }

    /// Score as the scorer reported it.
    pub fn score_value(&self) -> Score {
        if self.is_indeterminate() {
            Score::Indeterminate
        } else {
            Score::Determinate(self.score)
        }
    }

    /// Metric by run grid for presentation and export.
    pub fn comparison_table(&self, scenario: &Scenario) -> ComparisonTable {
        let columns = self
            .run_results
            .iter()
            .map(|r| format!("Run {}", r.run_index))
            .collect();

        let mut rows: Vec<ComparisonRow> = scenario
            .metrics()
            .iter()
            .map(|spec| ComparisonRow {
                label: spec.name.clone(),
                cells: self
                    .run_results
                    .iter()
                    .map(|run| match run.metrics.get(&spec.name) {
                        Some(Extraction::Found(v)) => format::full(spec.class, *v),
                        Some(Extraction::ParseError(_)) => PARSE_ERROR_CELL.to_string(),
                        Some(Extraction::NotFound) | None => NOT_FOUND_CELL.to_string(),
                    })
                    .collect(),
            })
            .collect();

        rows.push(ComparisonRow {
            label: "recommendation".to_string(),
            cells: self
                .run_results
                .iter()
                .map(|run| {
                    if run.is_failed() {
                        FAILED_CELL.to_string()
                    } else {
                        run.verdict.to_string()
                    }
                })
                .collect(),
        });

        ComparisonTable { columns, rows }
    }
}

/// One labelled row of the comparison table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonRow {
    pub label: String,
    pub cells: Vec<String>,
}

/// Metric by run grid. The last row holds each run's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonTable {
    pub columns: Vec<String>,
    pub rows: Vec<ComparisonRow>,
}

impl fmt::Display for ComparisonTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label_width = self
            .rows
            .iter()
            .map(|r| r.label.len())
            .chain(std::iter::once("metric".len()))
            .max()
            .unwrap_or(0);

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                self.rows
                    .iter()
                    .filter_map(|r| r.cells.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(c.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:<label_width$}", "metric")?;
        for (column, width) in self.columns.iter().zip(widths.iter().copied()) {
            write!(f, "  {:>width$}", column)?;
        }
        writeln!(f)?;

        for row in &self.rows {
            write!(f, "{:<label_width$}", row.label)?;
            for (cell, width) in row.cells.iter().zip(widths.iter().copied()) {
                write!(f, "  {:>width$}", cell)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consistency report: {}", self.scenario)?;
        writeln!(
            f,
            "Runs: {}  Temperature: {:.1}  Generated: {}",
            self.run_count,
            self.temperature,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;

        if self.is_indeterminate() {
            writeln!(f, "Score: indeterminate ({})", self.status_label)?;
        } else {
            writeln!(f, "Score: {}/100 ({})", self.score, self.status_label)?;
        }
        writeln!(f, "Max variance: {:.1}%", self.max_variance)?;

        if !self.variance_reports.is_empty() {
            writeln!(f)?;
            writeln!(f, "Variance")?;
            for r in &self.variance_reports {
                writeln!(
                    f,
                    "  {} {:<24} {:>7.1}%  (tolerance {:.1}%, {} to {})",
                    if r.within_tolerance { "ok " } else { "OUT" },
                    r.metric,
                    r.percent_variance,
                    r.tolerance,
                    format::compact(r.class, r.min_value),
                    format::compact(r.class, r.max_value),
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Findings")?;
        if self.findings.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for finding in &self.findings {
            writeln!(f, "  - {}", finding)?;
        }

        writeln!(f)?;
        writeln!(f, "Recommendations")?;
        for (i, rec) in self.recommendations.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, rec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallFailure, CallFailureKind};

    const SCENARIO: &str = r#"
name: "Report"
prompt: "Analyze."
expected_metrics:
  - name: annual_savings
    class: dollar_amounts
    patterns: ["(?i)annual savings[^$\\n]*{value}"]
  - name: payback_period
    class: time_periods
    patterns: ["(?i)payback[^\\d\\n]*{value}"]
tolerance:
  dollar_amounts: 2.0
  time_periods: 10.0
"#;

    fn scenario() -> Scenario {
        Scenario::from_yaml(SCENARIO).unwrap()
    }

    #[test]
    fn test_report_preserves_run_count_and_order() {
        let s = scenario();
        let runs = vec![
            RunResult::from_text(2, "Annual savings: $1,000,000", &s),
            RunResult::from_text(1, "Annual savings: $1,000,000", &s),
        ];
        let report = ConsistencyReport::build(&s, 0.7, runs, &ScoreBands::default()).unwrap();

        assert_eq!(report.run_count, 2);
        assert_eq!(report.run_results.len(), 2);
        assert_eq!(report.run_results[0].run_index, 1);
        assert_eq!(report.score, 100);
        assert_eq!(report.status_label, "PRODUCTION_READY");
    }

    #[test]
    fn test_empty_batch_rejected() {
        let result = ConsistencyReport::build(&scenario(), 0.7, vec![], &ScoreBands::default());
        assert!(matches!(result, Err(ConfigurationError::NoRuns)));
    }

    #[test]
    fn test_invalid_temperature_rejected() {
        let s = scenario();
        let runs = vec![RunResult::from_text(1, "", &s)];
        let result = ConsistencyReport::build(&s, f64::NAN, runs, &ScoreBands::default());
        assert!(matches!(result, Err(ConfigurationError::InvalidTemperature(_))));
    }

    #[test]
    fn test_comparison_table_cells() {
        let s = scenario();
        let runs = vec![
            RunResult::from_text(1, "Annual savings: $1,660,000\nPayback: 4.9 months\nRecommendation: PROCEED", &s),
            RunResult::from_text(2, "Annual savings: $1,700,000", &s),
            RunResult::failed(3, CallFailure::new(CallFailureKind::RateLimited, "429"), &s),
        ];
        let report = ConsistencyReport::build(&s, 0.7, runs, &ScoreBands::default()).unwrap();
        let table = report.comparison_table(&s);

        assert_eq!(table.columns, vec!["Run 1", "Run 2", "Run 3"]);
        assert_eq!(table.rows[0].label, "annual_savings");
        assert_eq!(table.rows[0].cells, vec!["$1,660,000", "$1,700,000", "N/A"]);
        assert_eq!(table.rows[1].cells, vec!["4.9 months", "N/A", "N/A"]);
        assert_eq!(table.rows[2].label, "recommendation");
        assert_eq!(table.rows[2].cells, vec!["PROCEED", "UNCLEAR", "FAILED"]);

        let rendered = table.to_string();
        assert!(rendered.starts_with("metric"));
        assert_eq!(rendered.lines().count(), 4);
    }

    #[test]
    fn test_indeterminate_report_renders() {
        let s = scenario();
        let runs = vec![RunResult::from_text(1, "Annual savings: $1M", &s)];
        let report = ConsistencyReport::build(&s, 0.0, runs, &ScoreBands::default()).unwrap();

        assert_eq!(report.score, 0);
        assert!(report.is_indeterminate());
        assert_eq!(report.score_value(), Score::Indeterminate);

        let text = report.to_string();
        assert!(text.contains("Score: indeterminate (INDETERMINATE)"));
        assert!(text.contains("Insufficient samples"));
    }

    #[test]
    fn test_report_serializes() {
        let s = scenario();
        let runs = vec![
            RunResult::from_text(1, "Annual savings: $1,000,000", &s),
            RunResult::from_text(2, "Annual savings: $1,100,000", &s),
        ];
        let report = ConsistencyReport::build(&s, 0.7, runs, &ScoreBands::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["run_count"], 2);
        assert_eq!(json["status"], "NOT_READY");
        assert_eq!(json["variance_reports"][0]["metric"], "annual_savings");
        assert_eq!(json["run_results"][0]["metrics"]["annual_savings"]["status"], "found");
    }
}
