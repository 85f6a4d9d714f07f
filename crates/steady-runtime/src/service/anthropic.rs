//! Anthropic Messages API service.
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! request header is set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::secrets::{ApiCredential, CredentialSource};
use super::{GenerationError, GenerationService};

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const API_VERSION: &str = "2023-06-01";

/// The Messages API accepts temperatures in `0.0..=1.0`.
const MAX_API_TEMPERATURE: f64 = 1.0;

/// Generation through Anthropic's Messages API.
pub struct AnthropicService {
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicService")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicService {
    fn with_credential(
        credential: ApiCredential,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
            client,
        })
    }

    /// Create a service with an explicit API key.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, GenerationError> {
        let credential =
            ApiCredential::new(api_key, CredentialSource::Programmatic, "Anthropic API key");
        Self::with_credential(credential, model, max_tokens)
    }

    /// Create a service with the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: impl Into<String>, max_tokens: u32) -> Result<Self, GenerationError> {
        let credential = ApiCredential::from_env(ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        Self::with_credential(credential, model, max_tokens)
    }

    /// Use `api_key` when given, else `ANTHROPIC_API_KEY`.
    pub fn from_config_or_env(
        api_key: Option<&str>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, GenerationError> {
        let credential =
            ApiCredential::from_config_or_env(api_key, ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        Self::with_credential(credential, model, max_tokens)
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl GenerationService for AnthropicService {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<String, GenerationError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GenerationError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        Ok(body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn max_temperature(&self) -> f64 {
        MAX_API_TEMPERATURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_creation() {
        let service = AnthropicService::new("test-key", "claude-sonnet-4-20250514", 4000).unwrap();
        assert_eq!(service.name(), "anthropic");
        assert_eq!(service.model(), "claude-sonnet-4-20250514");
        assert_eq!(service.max_temperature(), 1.0);
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let service = AnthropicService::new(secret_key, "model", 100).unwrap();

        let debug_output = format!("{:?}", service);
        assert!(
            !debug_output.contains(secret_key),
            "API key was exposed in Debug output!"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_request_shape() {
        let request = MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.7,
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["temperature"], 0.7);
    }

    #[test]
    fn test_response_text_blocks_are_joined() {
        let body: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Annual "},{"type":"text","text":"savings"}]}"#,
        )
        .unwrap();
        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        assert_eq!(text, "Annual savings");
    }
}
