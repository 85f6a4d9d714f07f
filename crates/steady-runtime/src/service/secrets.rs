//! Credential handling for generation services.
//!
//! Credentials are wrapped in [`SecretString`] as soon as they are read and
//! are only exposed when a request header is built. `Debug` and `Display`
//! never print the value.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::GenerationError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Read from a configuration value
    Config,
    /// Read from an environment variable
    Environment,
    /// Passed in by the caller
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely stored API credential.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, GenerationError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                GenerationError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Use `configured` when present, else fall back to `env_var`.
    pub fn from_config_or_env(
        configured: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, GenerationError> {
        match configured {
            Some(value) => Ok(Self::new(value, CredentialSource::Config, name)),
            None => Self::from_env(env_var, name),
        }
    }

    /// Expose the value. Call only where the request is built.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted_in_debug() {
        let secret = "sk-ant-REDACTED";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let secret = "sk-ant-REDACTED";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test API key");

        let display = cred.to_string();
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert_eq!(display, "Test API key from config [REDACTED]");
    }

    #[test]
    fn test_configured_value_wins() {
        let cred = ApiCredential::from_config_or_env(
            Some("configured-key"),
            "STEADY_TEST_UNSET_VARIABLE",
            "Test API key",
        )
        .unwrap();
        assert_eq!(cred.expose(), "configured-key");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_missing_env_is_not_configured() {
        let result = ApiCredential::from_env("STEADY_TEST_UNSET_VARIABLE", "Test API key");
        assert!(matches!(result, Err(GenerationError::NotConfigured(msg)) if msg.contains("STEADY_TEST_UNSET_VARIABLE")));
    }
}
