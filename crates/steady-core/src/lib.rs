//! # steady-core
//!
//! Deterministic consistency scoring for generated business-case analyses.
//!
//! Given the texts a generation service produced for one scenario prompt,
//! this crate answers:
//! - Which metrics could be read from each response?
//! - How much do they move between runs, relative to tolerance?
//! - Is the prompt stable enough to use, and what should change if not?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same runs always produce the same score
//! 2. **No service calls**: Everything here is pure; calls live in `steady-runtime`
//! 3. **Never fails on output**: Unreadable text degrades to findings
//! 4. **Explicit thresholds**: Score bands are a value passed in, never global
//!
//! ## Example
//!
//! ```rust,ignore
//! use steady_core::{analyze_texts, ScenarioCatalog, ScoreBands};
//!
//! let catalog = ScenarioCatalog::builtin()?;
//! let scenario = catalog.require("cloud-migration")?;
//! let report = analyze_texts(scenario, 0.7, &responses, &ScoreBands::default())?;
//!
//! println!("{}/100 {}", report.score, report.status_label);
//! for finding in &report.findings {
//!     println!("- {}", finding);
//! }
//! ```

pub mod extraction;
pub mod findings;
pub mod format;
pub mod report;
pub mod scenario;
pub mod scorer;
pub mod types;

// Re-export main types at crate root
pub use extraction::{classify_verdict, extract, extract_metric};
pub use findings::FindingGenerator;
pub use report::{ComparisonRow, ComparisonTable, ConsistencyReport};
pub use scenario::{MetricPattern, MetricSpec, Scenario, ScenarioCatalog};
pub use scorer::{score, ScoreBands, Scoring, EPSILON, MIN_OBSERVATIONS};
pub use types::{
    CallFailure, CallFailureKind, ConsistencyStatus, Extraction, MetricClass, RunResult, Score,
    VarianceReport, Verdict, VerdictAgreement, CALL_FAILED,
};

use thiserror::Error;

/// Highest sampling temperature accepted.
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Invalid scenarios, catalogs or run parameters. Raised before any
/// generation call is made.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Scenario '{scenario}' declares no metrics")]
    NoMetrics { scenario: String },

    #[error("Metric '{0}' is declared more than once")]
    DuplicateMetric(String),

    #[error("Scenario key '{0}' is used more than once")]
    DuplicateScenario(String),

    #[error("No tolerance for class {class}, used by metric '{metric}'")]
    MissingTolerance { class: MetricClass, metric: String },

    #[error("Tolerance for {class} must be a non-negative number, got {value}")]
    InvalidTolerance { class: MetricClass, value: f64 },

    #[error("Invalid pattern for metric '{metric}': {pattern}")]
    InvalidPattern {
        metric: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Baseline of metric '{metric}' must be a finite number")]
    InvalidBaseline { metric: String },

    #[error("Run count must be between 1 and {max}, got {requested}")]
    InvalidRunCount { requested: usize, max: usize },

    #[error("Temperature must be between 0.0 and {max}, got {0}", max = MAX_TEMPERATURE)]
    InvalidTemperature(f64),

    #[error("Invalid score bands: {0}")]
    InvalidBands(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("No runs to analyze")]
    NoRuns,
}

/// Check a sampling temperature.
pub fn validate_temperature(temperature: f64) -> Result<(), ConfigurationError> {
    if (0.0..=MAX_TEMPERATURE).contains(&temperature) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidTemperature(temperature))
    }
}

/// Score already-collected runs and build the report.
///
/// This is the main entry point once generation has happened.
pub fn evaluate(
    scenario: &Scenario,
    temperature: f64,
    runs: Vec<RunResult>,
    bands: &ScoreBands,
) -> Result<ConsistencyReport, ConfigurationError> {
    ConsistencyReport::build(scenario, temperature, runs, bands)
}

/// Extract, score and report on raw response texts, numbered from run 1.
pub fn analyze_texts<S: AsRef<str>>(
    scenario: &Scenario,
    temperature: f64,
    texts: &[S],
    bands: &ScoreBands,
) -> Result<ConsistencyReport, ConfigurationError> {
    let runs = texts
        .iter()
        .enumerate()
        .map(|(i, text)| RunResult::from_text(i + 1, text.as_ref(), scenario))
        .collect();

    evaluate(scenario, temperature, runs, bands)
}
