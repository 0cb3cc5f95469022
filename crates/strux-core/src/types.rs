use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::tools::ToolCall;

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// An outbound tool invocation requested by the model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolUse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    /// Raw JSON arguments, exactly as the model produced them
    pub arguments: String,
}

/// The outcome of executing one tool invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// Represents a message in a conversation.
///
/// Tool uses and tool results ride on the same type so a conversation log
/// can replay an entire tool-resolution turn; plain chat messages leave
/// both lists empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_uses: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Assistant turn carrying only tool invocations
    pub fn tool_uses(uses: Vec<ToolUse>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: String::new(),
            tool_uses: uses,
            tool_results: Vec::new(),
        }
    }

    /// Tool turn carrying one execution result
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: ChatRole::Tool,
            content: result.content.clone(),
            tool_uses: Vec::new(),
            tool_results: vec![result],
        }
    }
}

/// Request parameters for chat completions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub extra_params: Option<HashMap<String, serde_json::Value>>,
}

/// Builder pattern for chat requests
#[derive(Default)]
pub struct ChatRequestBuilder {
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    extra_params: Option<HashMap<String, serde_json::Value>>,
}

impl ChatRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(mut self, role: ChatRole, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::new(role, content));
        self
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.add_message(ChatRole::System, content)
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.add_message(ChatRole::User, content)
    }

    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.add_message(ChatRole::Assistant, content)
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn extra_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_params
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn build(self) -> ChatRequest {
        ChatRequest {
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            extra_params: self.extra_params,
        }
    }
}

/// Token usage information.
///
/// Accumulates monotonically across retry attempts and recursive
/// tool-resolution turns within one logical call; saturating addition keeps
/// the counters non-negative and overflow-safe.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Thinking (chain-of-thought) configuration forwarded to providers that
/// support it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: Option<u32>,
}

/// Events emitted during streaming extraction
#[derive(Debug)]
pub enum StreamData {
    /// A fragment of the model's visible output
    Content(String),
    /// A fragment of the model's reasoning output
    Thinking(String),
    /// A fully assembled tool call, resolved or awaiting the caller
    ToolCall(ToolCall),
    /// A terminal stream failure; the channel closes after this
    Error(ExtractError),
}
