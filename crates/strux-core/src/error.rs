use thiserror::Error;

use crate::mode::Mode;
use crate::types::TokenUsage;

/// Main error type for the extraction pipeline
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The target type could not be reflected into a schema
    #[error("Schema reflection failed: {message}")]
    SchemaReflection { message: String },

    /// Static (mode, provider) incompatibility, detected before any network call
    #[error("Mode {mode} is not supported by provider {provider}")]
    UnsupportedMode { provider: String, mode: Mode },

    /// Network/auth/rate-limit failure reported by the provider adapter.
    /// Never retried by this layer.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Tool-call mode, but the model returned zero tool calls
    #[error("Received no tool calls from model, expected at least one")]
    NoToolCall,

    /// The payload did not parse into the target shape even after cleanup
    #[error("Decode failed: {message}")]
    Decode { message: String, raw: String },

    /// The payload parsed but failed semantic validation against the schema
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Marshalling a value or request failed
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// All retry attempts were consumed by decode/validation failures.
    /// Carries the usage accumulated across every attempt.
    #[error("Hit max retry attempts ({attempts})")]
    RetriesExhausted { attempts: u32, usage: TokenUsage },

    /// The model kept requesting tools past the configured round bound
    #[error("Tool resolution exceeded {rounds} rounds")]
    ToolLoopExceeded { rounds: u32 },
}

impl ExtractError {
    /// Create a schema reflection error
    pub fn schema_reflection(message: impl Into<String>) -> Self {
        Self::SchemaReflection {
            message: message.into(),
        }
    }

    /// Create an unsupported-mode error
    pub fn unsupported_mode(provider: impl Into<String>, mode: Mode) -> Self {
        Self::UnsupportedMode {
            provider: provider.into(),
            mode,
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Whether the retry loop may consume budget on this error.
    ///
    /// Only decode and validation failures are retry-eligible; everything
    /// else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractError::Decode { .. } | ExtractError::Validation { .. }
        )
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExtractError::transport_with_source("Request timed out", err)
        } else if err.is_connect() {
            ExtractError::transport_with_source("Connection failed", err)
        } else {
            ExtractError::transport_with_source("HTTP request failed", err)
        }
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for ExtractError {
    fn from(err: serde_json::Error) -> Self {
        ExtractError::serialization("JSON serialization failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_and_validation_are_retryable() {
        assert!(ExtractError::decode("bad payload", "{oops").is_retryable());
        assert!(ExtractError::validation("age out of range").is_retryable());
    }

    #[test]
    fn fatal_categories_are_not_retryable() {
        assert!(!ExtractError::schema_reflection("no schema").is_retryable());
        assert!(!ExtractError::transport("connection reset").is_retryable());
        assert!(!ExtractError::NoToolCall.is_retryable());
        assert!(
            !ExtractError::unsupported_mode("mock", Mode::Toml).is_retryable()
        );
        assert!(
            !ExtractError::RetriesExhausted {
                attempts: 3,
                usage: TokenUsage::default(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn display_includes_mode_and_provider() {
        let err = ExtractError::unsupported_mode("mock", Mode::Yaml);
        let msg = err.to_string();
        assert!(msg.contains("mock"));
        assert!(msg.contains("yaml"));
    }

    #[test]
    fn retries_exhausted_carries_usage() {
        let err = ExtractError::RetriesExhausted {
            attempts: 4,
            usage: TokenUsage::new(10, 20),
        };
        match err {
            ExtractError::RetriesExhausted { attempts, usage } => {
                assert_eq!(attempts, 4);
                assert_eq!(usage.total_tokens, 30);
            }
            _ => unreachable!(),
        }
    }
}
