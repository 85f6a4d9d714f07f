//! Run configuration.
//!
//! Loaded from YAML or built from defaults. Durations accept either a plain
//! integer (seconds, or milliseconds for retry delays) or a humantime string
//! such as `"90s"` or `"2m"`.

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use steady_core::ScoreBands;

/// Errors reading or checking a run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one validation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Model requested from the generation service
    pub model: String,

    /// Response length cap per call
    pub max_tokens: u32,

    /// Limit for a single attempt
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,

    /// Calls in flight at once
    pub max_concurrency: usize,

    /// Largest accepted run count
    pub max_runs: usize,

    /// Run count when the caller does not choose one
    pub default_runs: usize,

    /// Wall-clock limit for the whole batch, retries included
    #[serde(with = "optional_duration_secs", skip_serializing_if = "Option::is_none")]
    pub overall_budget: Option<Duration>,

    pub retry: RetryConfig,

    pub bands: ScoreBands,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4000,
            call_timeout: Duration::from_secs(120),
            max_concurrency: 3,
            max_runs: 10,
            default_runs: 3,
            overall_budget: None,
            retry: RetryConfig::default(),
            bands: ScoreBands::default(),
        }
    }
}

impl RunConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_runs == 0 {
            return Err(ConfigError::Invalid("max_runs must be at least 1".into()));
        }
        if self.default_runs == 0 || self.default_runs > self.max_runs {
            return Err(ConfigError::Invalid(format!(
                "default_runs must be between 1 and {}, got {}",
                self.max_runs, self.default_runs
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("call_timeout must be positive".into()));
        }
        if self.overall_budget.is_some_and(|b| b.is_zero()) {
            return Err(ConfigError::Invalid("overall_budget must be positive".into()));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.min_delay must not exceed retry.max_delay".into(),
            ));
        }
        self.bands
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Bounded exponential backoff for retryable call failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first
    pub max_retries: usize,

    #[serde(with = "duration_millis")]
    pub min_delay: Duration,

    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }
}

/// Integer or humantime duration, as written in a config file.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Count(u64),
    Text(String),
}

impl DurationRepr {
    fn into_duration<E: serde::de::Error>(self, unit: fn(u64) -> Duration) -> Result<Duration, E> {
        match self {
            DurationRepr::Count(n) => Ok(unit(n)),
            DurationRepr::Text(s) => humantime::parse_duration(&s).map_err(E::custom),
        }
    }
}

mod duration_secs {
    use super::DurationRepr;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        DurationRepr::deserialize(deserializer)?.into_duration(Duration::from_secs)
    }
}

mod optional_duration_secs {
    use super::DurationRepr;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<DurationRepr>::deserialize(deserializer)?
            .map(|repr| repr.into_duration(Duration::from_secs))
            .transpose()
    }
}

mod duration_millis {
    use super::DurationRepr;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        DurationRepr::deserialize(deserializer)?.into_duration(Duration::from_millis)
    }
}
