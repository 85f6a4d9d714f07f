//! Run orchestrator for concurrent generation batches.
//!
//! The orchestrator issues the scenario prompt N times and collects one
//! [`RunResult`] per run. It implements:
//! - Concurrent fan-out bounded by `max_concurrency`
//! - Results written to run-indexed slots, so output order never depends
//!   on completion order
//! - A timeout per attempt and bounded retries for rate limits and timeouts
//! - An optional wall-clock budget for the whole batch
//!
//! A failed call never aborts the batch; it becomes a failed run.

use backon::Retryable;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use steady_core::{
    validate_temperature, CallFailure, CallFailureKind, ConfigurationError, RunResult, Scenario,
};

use crate::config::RunConfig;
use crate::service::{GenerationError, GenerationService};
use crate::RuntimeError;

/// Runs one scenario prompt against a generation service, N times.
pub struct RunOrchestrator {
    service: Arc<dyn GenerationService>,
    config: RunConfig,
}

impl RunOrchestrator {
    pub fn new(service: Arc<dyn GenerationService>, config: RunConfig) -> Self {
        Self { service, config }
    }

    pub fn builder() -> RunOrchestratorBuilder {
        RunOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Check a batch request without making any call.
    pub fn check_request(&self, temperature: f64, run_count: usize) -> Result<(), ConfigurationError> {
        if run_count == 0 || run_count > self.config.max_runs {
            return Err(ConfigurationError::InvalidRunCount {
                requested: run_count,
                max: self.config.max_runs,
            });
        }
        validate_temperature(temperature)?;
        if temperature > self.service.max_temperature() {
            return Err(ConfigurationError::InvalidTemperature(temperature));
        }
        Ok(())
    }

    /// Execute `run_count` generation calls and return the runs in run order.
    ///
    /// Only request validation can fail; every call failure is recorded in
    /// its run.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        temperature: f64,
        run_count: usize,
    ) -> Result<Vec<RunResult>, ConfigurationError> {
        self.check_request(temperature, run_count)?;

        let started = Instant::now();
        let deadline = self.config.overall_budget.map(|budget| started + budget);

        tracing::info!(
            scenario = scenario.key(),
            service = self.service.name(),
            run_count,
            temperature,
            max_concurrency = self.config.max_concurrency,
            "Starting validation batch"
        );

        let mut slots: Vec<Option<RunResult>> = vec![None; run_count];
        let mut completed = stream::iter(1..=run_count)
            .map(|run_index| self.run_one(scenario, temperature, run_index, deadline))
            .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some(run) = completed.next().await {
            if let Some(slot) = slots.get_mut(run.run_index - 1) {
                *slot = Some(run);
            }
        }

        let runs: Vec<RunResult> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    RunResult::failed(
                        i + 1,
                        CallFailure::new(CallFailureKind::ServiceError, "run did not complete"),
                        scenario,
                    )
                })
            })
            .collect();

        let failed = runs.iter().filter(|r| r.is_failed()).count();
        tracing::info!(
            scenario = scenario.key(),
            run_count,
            failed,
            elapsed = ?started.elapsed(),
            "Validation batch finished"
        );

        Ok(runs)
    }

    /// One run: retried generation inside the batch budget, then extraction.
    async fn run_one(
        &self,
        scenario: &Scenario,
        temperature: f64,
        run_index: usize,
        deadline: Option<Instant>,
    ) -> RunResult {
        let generation = self.generate_with_retry(scenario.prompt(), temperature, run_index);

        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, generation).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GenerationError::BudgetExhausted(
                    self.config.overall_budget.unwrap_or_default(),
                )),
            },
            None => generation.await,
        };

        match outcome {
            Ok(text) => {
                let run = RunResult::from_text(run_index, text, scenario);
                tracing::debug!(
                    run_index,
                    scenario = scenario.key(),
                    missing = run.extraction_errors.len(),
                    verdict = %run.verdict,
                    "Run completed"
                );
                run
            }
            Err(e) => {
                tracing::warn!(
                    run_index,
                    scenario = scenario.key(),
                    error = %e,
                    "Generation call failed"
                );
                RunResult::failed(run_index, CallFailure::from(&e), scenario)
            }
        }
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        temperature: f64,
        run_index: usize,
    ) -> Result<String, GenerationError> {
        (|| self.attempt(prompt, temperature))
            .retry(self.config.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(GenerationError::is_retryable)
            .adjust(|e: &GenerationError, delay| {
                delay.map(|d| retry_delay(e, d, self.config.retry.max_delay))
            })
            .notify(|e: &GenerationError, delay| {
                tracing::warn!(run_index, error = %e, delay = ?delay, "Retrying generation call");
            })
            .await
    }

    /// A single call under the per-call timeout.
    async fn attempt(&self, prompt: &str, temperature: f64) -> Result<String, GenerationError> {
        let limit = self.config.call_timeout;
        match tokio::time::timeout(limit, self.service.generate(prompt, temperature)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(limit)),
        }
    }
}

/// A service-supplied `retry_after` raises the backoff delay up to `max_delay`.
/// The overall budget still bounds the wait.
fn retry_delay(error: &GenerationError, backoff: Duration, max_delay: Duration) -> Duration {
    match error {
        GenerationError::RateLimited {
            retry_after: Some(after),
        } => backoff.max((*after).min(max_delay)),
        _ => backoff,
    }
}

/// Builder for RunOrchestrator.
pub struct RunOrchestratorBuilder {
    service: Option<Arc<dyn GenerationService>>,
    config: RunConfig,
}

impl RunOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            service: None,
            config: RunConfig::default(),
        }
    }

    /// Set the generation service.
    pub fn service(mut self, service: Arc<dyn GenerationService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<RunOrchestrator, RuntimeError> {
        let service = self
            .service
            .ok_or_else(|| RuntimeError::NotConfigured("No generation service set".to_string()))?;
        self.config.validate()?;

        Ok(RunOrchestrator::new(service, self.config))
    }
}

impl Default for RunOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::service::ScriptedService;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::time::Duration;
    use steady_core::{Extraction, CALL_FAILED};

    const SCENARIO: &str = r#"
name: "Orchestrated"
prompt: "Estimate the savings."
expected_metrics:
  - name: annual_savings
    class: dollar_amounts
    patterns: ["(?i)annual savings[^$\\n]*{value}"]
tolerance:
  dollar_amounts: 2.0
"#;

    const RESPONSE: &str = "Annual savings: $1,000,000\nRecommendation: PROCEED";

    fn scenario() -> Scenario {
        Scenario::from_yaml(SCENARIO).unwrap()
    }

    fn sequential() -> RunConfig {
        RunConfig {
            max_concurrency: 1,
            retry: RetryConfig::disabled(),
            ..Default::default()
        }
    }

    fn orchestrator(service: Arc<ScriptedService>, config: RunConfig) -> RunOrchestrator {
        RunOrchestrator::builder()
            .service(service)
            .config(config)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_output_length_matches_run_count() {
        for run_count in 1..=10 {
            let service = Arc::new(ScriptedService::from_texts("scripted", [RESPONSE]));
            let runs = orchestrator(service.clone(), RunConfig::default())
                .execute(&scenario(), 0.7, run_count)
                .await
                .unwrap();

            assert_eq!(runs.len(), run_count);
            assert_eq!(service.calls(), run_count);
            assert!(runs.iter().all(|r| r.value("annual_savings") == Some(1_000_000.0)));
        }
    }

    #[tokio::test]
    async fn test_invalid_run_count_makes_no_calls() {
        let service = Arc::new(ScriptedService::from_texts("scripted", [RESPONSE]));
        let orch = orchestrator(service.clone(), RunConfig::default());

        for run_count in [0, 11] {
            let result = orch.execute(&scenario(), 0.7, run_count).await;
            assert!(matches!(
                result,
                Err(ConfigurationError::InvalidRunCount { requested, max: 10 }) if requested == run_count
            ));
        }
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_call_becomes_failed_run() {
        let service = Arc::new(
            ScriptedService::new("scripted")
                .respond(RESPONSE)
                .fail(GenerationError::Api {
                    status: 500,
                    message: "overloaded".into(),
                })
                .respond(RESPONSE),
        );
        let runs = orchestrator(service, sequential())
            .execute(&scenario(), 0.7, 3)
            .await
            .unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].value("annual_savings"), Some(1_000_000.0));
        assert_eq!(runs[2].value("annual_savings"), Some(1_000_000.0));

        let failed = &runs[1];
        assert_eq!(failed.run_index, 2);
        assert!(failed.raw_text.is_empty());
        assert_eq!(failed.metrics.get("annual_savings"), Some(&Extraction::NotFound));
        assert!(failed.extraction_errors.contains(CALL_FAILED));
        let failure = failed.call_failure.as_ref().unwrap();
        assert_eq!(failure.kind, CallFailureKind::ServiceError);
        assert!(failure.message.contains("overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let service = Arc::new(
            ScriptedService::new("slow").respond_after(Duration::from_secs(300), RESPONSE),
        );
        let config = RunConfig {
            call_timeout: Duration::from_secs(1),
            ..sequential()
        };
        let runs = orchestrator(service, config)
            .execute(&scenario(), 0.7, 2)
            .await
            .unwrap();

        assert_eq!(runs.len(), 2);
        for run in &runs {
            assert_eq!(
                run.call_failure.as_ref().map(|f| f.kind),
                Some(CallFailureKind::Timeout)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let service = Arc::new(
            ScriptedService::new("flaky")
                .fail(GenerationError::RateLimited { retry_after: None })
                .respond(RESPONSE),
        );
        let config = RunConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        let runs = orchestrator(service.clone(), config)
            .execute(&scenario(), 0.7, 1)
            .await
            .unwrap();

        assert!(!runs[0].is_failed());
        assert_eq!(runs[0].value("annual_savings"), Some(1_000_000.0));
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let service = Arc::new(
            ScriptedService::new("limited")
                .fail(GenerationError::RateLimited {
                    retry_after: Some(Duration::from_secs(3)),
                })
                .respond(RESPONSE),
        );
        let config = RunConfig {
            max_concurrency: 1,
            ..Default::default()
        };

        let started = tokio::time::Instant::now();
        let runs = orchestrator(service.clone(), config)
            .execute(&scenario(), 0.7, 1)
            .await
            .unwrap();

        assert!(!runs[0].is_failed());
        assert_eq!(service.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_retry_after_is_capped() {
        let max = Duration::from_secs(10);
        let limited = |secs| GenerationError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        };

        assert_eq!(
            retry_delay(&limited(3), Duration::from_millis(500), max),
            Duration::from_secs(3)
        );
        assert_eq!(retry_delay(&limited(60), Duration::from_millis(500), max), max);
        assert_eq!(
            retry_delay(&limited(1), Duration::from_secs(4), max),
            Duration::from_secs(4)
        );
        assert_eq!(
            retry_delay(
                &GenerationError::Timeout(Duration::from_secs(1)),
                Duration::from_millis(500),
                max
            ),
            Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let service = Arc::new(
            ScriptedService::new("limited").fail(GenerationError::RateLimited { retry_after: None }),
        );
        let runs = orchestrator(service.clone(), RunConfig::default())
            .execute(&scenario(), 0.7, 1)
            .await
            .unwrap();

        assert_eq!(service.calls(), 3);
        assert_eq!(
            runs[0].call_failure.as_ref().map(|f| f.kind),
            Some(CallFailureKind::RateLimited)
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let service = Arc::new(ScriptedService::new("broken").fail(GenerationError::Api {
            status: 400,
            message: "bad request".into(),
        }));
        orchestrator(service.clone(), RunConfig::default())
            .execute(&scenario(), 0.7, 1)
            .await
            .unwrap();

        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_budget_stops_pending_runs() {
        let service = Arc::new(
            ScriptedService::new("slow").respond_after(Duration::from_secs(30), RESPONSE),
        );
        let config = RunConfig {
            call_timeout: Duration::from_secs(60),
            overall_budget: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let runs = orchestrator(service, config)
            .execute(&scenario(), 0.7, 3)
            .await
            .unwrap();

        assert_eq!(runs.len(), 3);
        for run in &runs {
            let failure = run.call_failure.as_ref().unwrap();
            assert_eq!(failure.kind, CallFailureKind::Timeout);
            assert!(failure.message.contains("budget"));
        }
    }

    struct LowTemperatureService;

    #[async_trait]
    impl GenerationService for LowTemperatureService {
        async fn generate(&self, _prompt: &str, _temperature: f64) -> Result<String, GenerationError> {
            Ok(RESPONSE.to_string())
        }

        fn name(&self) -> &str {
            "low-temperature"
        }

        fn max_temperature(&self) -> f64 {
            1.0
        }
    }

    #[tokio::test]
    async fn test_temperature_above_service_limit_rejected() {
        let orch = RunOrchestrator::new(Arc::new(LowTemperatureService), RunConfig::default());

        assert!(orch.execute(&scenario(), 1.0, 1).await.is_ok());
        assert!(matches!(
            orch.execute(&scenario(), 1.5, 1).await,
            Err(ConfigurationError::InvalidTemperature(_))
        ));
        assert!(matches!(
            orch.execute(&scenario(), -0.5, 1).await,
            Err(ConfigurationError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn test_builder_requires_service() {
        assert!(matches!(
            RunOrchestrator::builder().build(),
            Err(RuntimeError::NotConfigured(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_runs_come_back_in_run_order(run_count in 1usize..=10, concurrency in 1usize..=4) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let service = Arc::new(ScriptedService::from_texts("scripted", [RESPONSE, ""]));
            let config = RunConfig {
                max_concurrency: concurrency,
                ..Default::default()
            };
            let runs = runtime
                .block_on(orchestrator(service, config).execute(&scenario(), 0.0, run_count))
                .unwrap();

            prop_assert_eq!(runs.len(), run_count);
            for (i, run) in runs.iter().enumerate() {
                prop_assert_eq!(run.run_index, i + 1);
            }
        }
    }
}
