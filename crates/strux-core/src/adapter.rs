use std::collections::HashMap;
use std::pin::Pin;

use crate::error::ExtractError;
use crate::mode::Mode;
use crate::schema::FunctionDefinition;
use crate::types::{ChatMessage, ThinkingConfig, TokenUsage, ToolUse};

/// Response-format constraint forwarded to the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseFormat {
    /// No constraint; the model answers in free text
    #[default]
    Text,
    /// Any syntactically valid JSON object
    JsonObject,
    /// A named JSON schema the provider enforces server-side
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        strict: bool,
    },
}

/// A fully shaped request, ready for one provider round-trip.
///
/// The pipeline produces this once per call from the caller's
/// [`ChatRequest`](crate::types::ChatRequest) plus the mode plan; retries
/// resend it unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    /// Tool declarations: the schema's functions in tool-call modes, the
    /// registered tool set otherwise
    pub tools: Vec<FunctionDefinition>,
    /// Strict argument-schema enforcement for the declared tools
    pub strict_tools: bool,
    pub response_format: ResponseFormat,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub thinking: Option<ThinkingConfig>,
    /// Arbitrary extra body fields merged into the provider payload
    pub extra_body: Option<HashMap<String, serde_json::Value>>,
}

/// What came back from one provider round-trip
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolUse>,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// An incremental event from a provider's live stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A fragment of visible output
    Content(String),
    /// A fragment of reasoning output
    Thinking(String),
    /// A tool-call fragment; arguments are assembled piecemeal per slot
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Usage reported by the provider, typically once near stream end
    Usage(TokenUsage),
}

/// A pinned, boxed, `Send` stream of provider events
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<ProviderEvent, ExtractError>> + Send>>;

/// The narrow interface each provider integration implements.
///
/// The pipeline is written exactly once against this trait; a provider
/// integration only translates [`ProviderRequest`] to its wire format and
/// back. Transport concerns (auth, rate limiting, HTTP retries) live behind
/// this boundary and are never retried by the extraction layer.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Canonical provider identifier (e.g. "openai")
    fn name(&self) -> &'static str;

    /// Static capability check, consulted before any network call
    fn supports_mode(&self, mode: Mode) -> bool;

    /// One synchronous chat round-trip
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ExtractError>;

    /// Open a live event stream for the request
    async fn invoke_streaming(&self, request: &ProviderRequest)
    -> Result<EventStream, ExtractError>;
}
