//! Generation service abstractions.
//!
//! A generation service is a black box: prompt and temperature in, text
//! (or a failure) out. The orchestrator is the only caller.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use steady_core::{CallFailure, CallFailureKind, MAX_TEMPERATURE};

mod scripted;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use scripted::ScriptedService;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicService, ANTHROPIC_API_KEY_ENV, DEFAULT_BASE_URL};

/// Errors from generation services.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Overall budget of {0:?} exhausted")]
    BudgetExhausted(Duration),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Unreadable response: {0}")]
    Parse(String),

    #[error("Service not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Rate limits and per-call timeouts may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. } | GenerationError::Timeout(_)
        )
    }

    pub fn kind(&self) -> CallFailureKind {
        match self {
            GenerationError::RateLimited { .. } => CallFailureKind::RateLimited,
            GenerationError::Timeout(_) | GenerationError::BudgetExhausted(_) => {
                CallFailureKind::Timeout
            }
            _ => CallFailureKind::ServiceError,
        }
    }
}

impl From<&GenerationError> for CallFailure {
    fn from(error: &GenerationError) -> Self {
        CallFailure::new(error.kind(), error.to_string())
    }
}

/// A text generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate one response for `prompt`.
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<String, GenerationError>;

    /// Service name for logging.
    fn name(&self) -> &str;

    /// Highest temperature the backend accepts.
    fn max_temperature(&self) -> f64 {
        MAX_TEMPERATURE
    }
}
