//! OpenAI-compatible provider adapter.
//!
//! Translates the pipeline's shaped request to the chat-completions wire
//! protocol and back. This is the reference [`ProviderAdapter`]; any
//! endpoint speaking the same protocol works through
//! [`OpenAiConfig::with_base_url`](crate::config::OpenAiConfig::with_base_url).

use async_stream::stream;
use futures::{StreamExt, pin_mut};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::adapter::{
    EventStream, ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponse, ResponseFormat,
};
use crate::config::OpenAiConfig;
use crate::error::ExtractError;
use crate::mode::Mode;
use crate::types::{ChatMessage, ChatRole, TokenUsage, ToolUse};
use crate::utils::sse::sse_data_lines;

/// Adapter for OpenAI-compatible chat-completions endpoints
#[derive(Clone)]
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ExtractError::from)?;
        Ok(Self { config, client })
    }

    /// Create an adapter from environment variables
    pub fn from_env(model: impl Into<String>) -> Result<Self, ExtractError> {
        Self::new(OpenAiConfig::from_env(model)?)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url())
    }

    fn body(&self, request: &ProviderRequest, streaming: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.config.model));
        body.insert(
            "messages".into(),
            Value::Array(request.messages.iter().map(wire_message).collect()),
        );
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|function| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": function.name,
                            "description": function.description,
                            "parameters": function.parameters,
                            "strict": request.strict_tools,
                        },
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }
        match &request.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::JsonObject => {
                body.insert("response_format".into(), json!({"type": "json_object"}));
            }
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => {
                body.insert(
                    "response_format".into(),
                    json!({
                        "type": "json_schema",
                        "json_schema": {
                            "name": name,
                            "schema": schema,
                            "strict": strict,
                        },
                    }),
                );
            }
        }
        if let Some(thinking) = &request.thinking {
            let kind = if thinking.enabled { "enabled" } else { "disabled" };
            body.insert("enable_thinking".into(), json!(thinking.enabled));
            body.insert("thinking".into(), json!({ "type": kind }));
            body.insert(
                "chat_template_kwargs".into(),
                json!({
                    "enable_thinking": thinking.enabled,
                    "thinking_budget": thinking.budget_tokens,
                }),
            );
        }
        if streaming {
            body.insert("stream".into(), json!(true));
            body.insert("stream_options".into(), json!({"include_usage": true}));
        }
        if let Some(extra) = &request.extra_body {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Object(body)
    }

    async fn post(&self, body: &Value, streaming: bool) -> Result<reqwest::Response, ExtractError> {
        let mut builder = self.client.post(self.endpoint());
        for (key, value) in self.config.request_headers() {
            builder = builder.header(key, value);
        }
        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }
        let response = builder.json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ExtractError::transport(format!(
                "openai: {status} - {detail}"
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn supports_mode(&self, _mode: Mode) -> bool {
        // The chat-completions protocol covers every mode: native tools,
        // json_object/json_schema response formats, and free text.
        true
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ExtractError> {
        let body = self.body(request, false);
        let response = self.post(&body, false).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ExtractError::serialization("Failed to parse chat completion", e))?;
        Ok(completion.into_response())
    }

    async fn invoke_streaming(
        &self,
        request: &ProviderRequest,
    ) -> Result<EventStream, ExtractError> {
        let body = self.body(request, true);
        let response = self.post(&body, true).await?;
        let lines = sse_data_lines(response.bytes_stream());

        let events = stream! {
            pin_mut!(lines);
            while let Some(line) = lines.next().await {
                match line {
                    Ok(data) => match serde_json::from_str::<ChatChunk>(&data) {
                        Ok(chunk) => {
                            for event in chunk.into_events() {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(ExtractError::serialization(
                                "Failed to parse stream chunk",
                                e,
                            ));
                        }
                    },
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(events))
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::System => json!({"role": "system", "content": message.content}),
        ChatRole::User => json!({"role": "user", "content": message.content}),
        ChatRole::Assistant => {
            if message.tool_uses.is_empty() {
                json!({"role": "assistant", "content": message.content})
            } else {
                let tool_calls: Vec<Value> = message
                    .tool_uses
                    .iter()
                    .map(|tool_use| {
                        json!({
                            "id": tool_use.id,
                            "type": "function",
                            "function": {
                                "name": tool_use.name,
                                "arguments": tool_use.arguments,
                            },
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": tool_calls,
                })
            }
        }
        ChatRole::Tool => {
            let id = message
                .tool_results
                .first()
                .map(|result| result.id.clone())
                .unwrap_or_default();
            json!({
                "role": "tool",
                "tool_call_id": id,
                "content": message.content,
            })
        }
    }
}

// ---- Wire response types ----

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        let mut converted = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
        if usage.total_tokens > 0 {
            converted.total_tokens = usage.total_tokens;
        }
        converted
    }
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: String,
}

impl ChatCompletion {
    fn into_response(mut self) -> ProviderResponse {
        let usage = self.usage.take().map(TokenUsage::from).unwrap_or_default();
        let model = std::mem::take(&mut self.model);
        let Some(choice) = self.choices.into_iter().next() else {
            return ProviderResponse {
                usage,
                model,
                ..Default::default()
            };
        };
        ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolUse {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            usage,
            model,
            finish_reason: choice.finish_reason,
        }
    }
}

// ---- Wire streaming types ----

#[derive(Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl ChatChunk {
    fn into_events(self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        for choice in self.choices {
            let Some(delta) = choice.delta else { continue };
            for call in delta.tool_calls {
                let function = call.function.unwrap_or(ChunkFunction {
                    name: None,
                    arguments: String::new(),
                });
                events.push(ProviderEvent::ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name: function.name,
                    arguments: function.arguments,
                });
            }
            if let Some(text) = delta.reasoning_content {
                if !text.is_empty() {
                    events.push(ProviderEvent::Thinking(text));
                }
            }
            if let Some(text) = delta.content {
                if !text.is_empty() {
                    events.push(ProviderEvent::Content(text));
                }
            }
        }
        if let Some(usage) = self.usage {
            events.push(ProviderEvent::Usage(usage.into()));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FunctionDefinition;
    use crate::types::{ThinkingConfig, ToolResult};

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(OpenAiConfig::new("sk-test", "gpt-4o-mini")).unwrap()
    }

    #[test]
    fn body_carries_messages_and_sampling_params() {
        let request = ProviderRequest {
            messages: vec![ChatMessage::system("extract"), ChatMessage::user("Robby is 22")],
            temperature: Some(0.5),
            max_tokens: Some(100),
            ..Default::default()
        };
        let body = adapter().body(&request, false);

        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("Robby is 22"));
        assert_eq!(body["temperature"], json!(0.5));
        assert!(body.get("stream").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn body_maps_response_formats() {
        let mut request = ProviderRequest {
            response_format: ResponseFormat::JsonObject,
            ..Default::default()
        };
        let body = adapter().body(&request, false);
        assert_eq!(body["response_format"]["type"], json!("json_object"));

        request.response_format = ResponseFormat::JsonSchema {
            name: "Person".into(),
            schema: json!({"type": "object"}),
            strict: true,
        };
        let body = adapter().body(&request, false);
        assert_eq!(body["response_format"]["type"], json!("json_schema"));
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("Person"));
        assert_eq!(body["response_format"]["json_schema"]["strict"], json!(true));
    }

    #[test]
    fn body_declares_tools_with_strictness() {
        let request = ProviderRequest {
            tools: vec![FunctionDefinition {
                name: "Person".into(),
                description: "target shape".into(),
                parameters: json!({"type": "object"}),
            }],
            strict_tools: true,
            ..Default::default()
        };
        let body = adapter().body(&request, false);
        assert_eq!(body["tools"][0]["type"], json!("function"));
        assert_eq!(body["tools"][0]["function"]["name"], json!("Person"));
        assert_eq!(body["tools"][0]["function"]["strict"], json!(true));
    }

    #[test]
    fn body_streaming_asks_for_usage() {
        let body = adapter().body(&ProviderRequest::default(), true);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["stream_options"]["include_usage"], json!(true));
    }

    #[test]
    fn body_forwards_thinking_and_extra_fields() {
        let request = ProviderRequest {
            thinking: Some(ThinkingConfig {
                enabled: true,
                budget_tokens: Some(512),
            }),
            extra_body: Some(
                [("seed".to_string(), json!(7))]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let body = adapter().body(&request, false);
        assert_eq!(body["enable_thinking"], json!(true));
        assert_eq!(body["thinking"]["type"], json!("enabled"));
        assert_eq!(body["chat_template_kwargs"]["thinking_budget"], json!(512));
        assert_eq!(body["seed"], json!(7));
    }

    #[test]
    fn tool_turns_round_trip_to_the_wire_shape() {
        let assistant = ChatMessage::tool_uses(vec![ToolUse {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: "{}".into(),
        }]);
        let wire = wire_message(&assistant);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], json!("lookup"));

        let tool = ChatMessage::tool_result(ToolResult {
            id: "call_1".into(),
            name: "lookup".into(),
            content: "found".into(),
            is_error: false,
        });
        let wire = wire_message(&tool);
        assert_eq!(wire["role"], json!("tool"));
        assert_eq!(wire["tool_call_id"], json!("call_1"));
        assert_eq!(wire["content"], json!("found"));
    }

    #[test]
    fn completion_parses_text_and_tool_calls() {
        let raw = json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "Person", "arguments": "{\"name\":\"Robby\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16},
        });
        let completion: ChatCompletion = serde_json::from_value(raw).unwrap();
        let response = completion.into_response();

        assert!(response.text.is_empty());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "Person");
        assert_eq!(response.usage.total_tokens, 16);
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn chunk_fans_out_into_ordered_events() {
        let raw = json!({
            "choices": [{
                "delta": {
                    "reasoning_content": "thinking...",
                    "content": "partial",
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": {"name": "lookup", "arguments": "{\"q\":"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        });
        let chunk: ChatChunk = serde_json::from_value(raw).unwrap();
        let events = chunk.into_events();

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], ProviderEvent::ToolCallDelta { index: 0, .. }));
        assert!(matches!(&events[1], ProviderEvent::Thinking(t) if t == "thinking..."));
        assert!(matches!(&events[2], ProviderEvent::Content(t) if t == "partial"));
        assert!(matches!(&events[3], ProviderEvent::Usage(u) if u.total_tokens == 4));
    }
}
