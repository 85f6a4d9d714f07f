//! Replay of fixed responses, for demo mode and tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{GenerationError, GenerationService};

#[derive(Debug, Clone)]
struct Step {
    outcome: Result<String, GenerationError>,
    delay: Duration,
}

/// Answers calls with a scripted sequence of responses and failures.
///
/// The n-th call gets the n-th step; the script wraps around when it runs
/// out. An empty script fails every call.
#[derive(Debug)]
pub struct ScriptedService {
    name: String,
    steps: Vec<Step>,
    calls: AtomicUsize,
}

impl ScriptedService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// A service replaying `texts` in order.
    pub fn from_texts<I, S>(name: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .fold(Self::new(name), |service, text| service.respond(text))
    }

    /// Append a successful response.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.respond_after(Duration::ZERO, text)
    }

    /// Append a successful response delivered after `delay`.
    pub fn respond_after(mut self, delay: Duration, text: impl Into<String>) -> Self {
        self.steps.push(Step {
            outcome: Ok(text.into()),
            delay,
        });
        self
    }

    /// Append a failure.
    pub fn fail(mut self, error: GenerationError) -> Self {
        self.steps.push(Step {
            outcome: Err(error),
            delay: Duration::ZERO,
        });
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, _prompt: &str, _temperature: f64) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let Some(step) = self.steps.get(call % self.steps.len().max(1)).cloned() else {
            return Err(GenerationError::NotConfigured(format!(
                "scripted service '{}' has no responses",
                self.name
            )));
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}
