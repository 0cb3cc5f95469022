use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the OpenAI-compatible adapter.
///
/// Works against any endpoint speaking the chat-completions protocol; point
/// `base_url` at a compatible gateway to use a different vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_seconds: u64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            headers: HashMap::new(),
            timeout_seconds: 60,
        }
    }

    /// Read `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`) from the
    /// environment
    pub fn from_env(model: impl Into<String>) -> Result<Self, ExtractError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ExtractError::transport("OPENAI_API_KEY environment variable not set")
        })?;
        let mut config = Self::new(api_key, model);
        config.base_url = std::env::var("OPENAI_BASE_URL").ok();
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// All outbound headers, including authorization
    pub fn request_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.api_key.trim().is_empty() {
            return Err(ExtractError::transport("API key must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(ExtractError::transport("model must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let config = OpenAiConfig::new("sk-test", "gpt-4o-mini")
            .with_base_url("https://gateway.internal/v1")
            .with_header("X-Team", "extraction")
            .with_timeout(10);

        assert_eq!(config.base_url(), "https://gateway.internal/v1");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        let headers = config.request_headers();
        assert_eq!(headers["Authorization"], "Bearer sk-test");
        assert_eq!(headers["X-Team"], "extraction");
    }

    #[test]
    fn default_base_url_applies() {
        let config = OpenAiConfig::new("sk-test", "gpt-4o-mini");
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn validation_rejects_blank_fields() {
        assert!(OpenAiConfig::new("", "model").validate().is_err());
        assert!(OpenAiConfig::new("key", " ").validate().is_err());
        assert!(OpenAiConfig::new("key", "model").validate().is_ok());
    }
}
