//! # steady-runtime
//!
//! Batch execution for Steady.
//!
//! This crate calls a generation service for a scenario prompt N times,
//! concurrently, and hands the collected runs to `steady-core` for scoring.
//! It is the only place steady talks to a network service.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steady_core::ScenarioCatalog;
//! use steady_runtime::{AnthropicService, ConsistencyValidator, RunConfig};
//!
//! let config = RunConfig::default();
//! let service = AnthropicService::from_env(&config.model, config.max_tokens)?;
//! let validator = ConsistencyValidator::new(Arc::new(service), config)?;
//!
//! let catalog = ScenarioCatalog::builtin()?;
//! let report = validator
//!     .validate(catalog.require("cloud-migration")?, 0.7, 3)
//!     .await?;
//! println!("{}", report);
//! ```

pub mod config;
pub mod orchestrator;
pub mod service;

pub use config::{ConfigError, RetryConfig, RunConfig};
pub use orchestrator::{RunOrchestrator, RunOrchestratorBuilder};
pub use service::{
    ApiCredential, CredentialSource, GenerationError, GenerationService, ScriptedService,
};

#[cfg(feature = "anthropic")]
pub use service::{AnthropicService, ANTHROPIC_API_KEY_ENV};

use std::sync::Arc;
use thiserror::Error;

use steady_core::{ConfigurationError, ConsistencyReport, Scenario};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Generation service error: {0}")]
    Service(#[from] GenerationError),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Runs a batch and scores it: the end-to-end validation entry point.
pub struct ConsistencyValidator {
    orchestrator: RunOrchestrator,
}

impl ConsistencyValidator {
    pub fn new(service: Arc<dyn GenerationService>, config: RunConfig) -> Result<Self, RuntimeError> {
        let orchestrator = RunOrchestrator::builder()
            .service(service)
            .config(config)
            .build()?;
        Ok(Self { orchestrator })
    }

    pub fn from_orchestrator(orchestrator: RunOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn config(&self) -> &RunConfig {
        self.orchestrator.config()
    }

    /// Run `scenario` `run_count` times at `temperature` and build the report.
    ///
    /// Fails only on invalid input, before any call is made. Call and
    /// extraction failures end up in the report.
    pub async fn validate(
        &self,
        scenario: &Scenario,
        temperature: f64,
        run_count: usize,
    ) -> Result<ConsistencyReport, RuntimeError> {
        let runs = self.orchestrator.execute(scenario, temperature, run_count).await?;
        let report = steady_core::evaluate(scenario, temperature, runs, &self.config().bands)?;

        tracing::info!(
            scenario = scenario.key(),
            score = report.score,
            status = %report.status,
            "Consistency report ready"
        );
        Ok(report)
    }

    /// Same as [`validate`](Self::validate) with the configured default run count.
    pub async fn validate_default(
        &self,
        scenario: &Scenario,
        temperature: f64,
    ) -> Result<ConsistencyReport, RuntimeError> {
        self.validate(scenario, temperature, self.config().default_runs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steady_core::{ConsistencyStatus, ScenarioCatalog};

    fn response(savings: &str) -> String {
        format!(
            "**Annual Savings: {}**\n\
             Migration Investment: $680,000\n\
             **Payback Period: 4.9 months**\n\
             **Net 3-Year Savings: $4,300,000**\n\
             **ROI: 632%**\n\
             **Recommendation: PROCEED**\n",
            savings
        )
    }

    fn validator(service: ScriptedService) -> ConsistencyValidator {
        let config = RunConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        ConsistencyValidator::new(Arc::new(service), config).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_out_of_tolerance() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let scenario = catalog.require("cloud-migration").unwrap();
        let service = ScriptedService::from_texts(
            "scripted",
            [
                response("$2,000,000"),
                response("$2,100,000"),
                response("$2,050,000"),
            ],
        );

        let report = validator(service).validate(scenario, 0.7, 3).await.unwrap();

        assert_eq!(report.run_count, 3);
        let savings = report
            .variance_reports
            .iter()
            .find(|r| r.metric == "annual_savings")
            .unwrap();
        assert!((savings.percent_variance - 5.0).abs() < 1e-9);
        assert!(!savings.within_tolerance);
        assert!(report
            .findings
            .iter()
            .any(|f| f.starts_with("annual_savings varies by 5.0%") && f.contains("$2.00M–$2.10M")));
        assert_ne!(report.status, ConsistencyStatus::ProductionReady);
    }

    #[tokio::test]
    async fn test_end_to_end_with_failed_call() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let scenario = catalog.require("cloud-migration").unwrap();
        let service = ScriptedService::new("scripted")
            .respond(response("$1,660,000"))
            .fail(GenerationError::Http("connection reset".into()))
            .respond(response("$1,660,000"));

        let report = validator(service).validate(scenario, 0.7, 3).await.unwrap();

        assert_eq!(report.run_count, 3);
        assert_eq!(report.score, 100);
        assert!(report.run_results[1].is_failed());
        assert!(report.findings.iter().any(|f| f.starts_with("Run 2 failed")));
    }

    #[tokio::test]
    async fn test_single_run_is_indeterminate() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let scenario = catalog.require("cloud-migration").unwrap();
        let service = ScriptedService::from_texts("scripted", [response("$1,660,000")]);

        let report = validator(service).validate(scenario, 0.7, 1).await.unwrap();

        assert!(report.is_indeterminate());
        assert!(report.findings.iter().any(|f| f.starts_with("Insufficient samples")));
    }

    #[tokio::test]
    async fn test_invalid_request_is_an_error() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let scenario = catalog.require("cloud-migration").unwrap();
        let service = ScriptedService::from_texts("scripted", [response("$1,660,000")]);

        let result = validator(service).validate(scenario, 0.7, 0).await;
        assert!(matches!(
            result,
            Err(RuntimeError::Configuration(ConfigurationError::InvalidRunCount { .. }))
        ));
    }
}
