use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::adapter::{ProviderAdapter, ProviderRequest, ProviderResponse, ResponseFormat};
use crate::encoding::{self, Encoder};
use crate::error::ExtractError;
use crate::memory::Memory;
use crate::mode::{Mode, PayloadSource, SchemaGuidance, WireFormat};
use crate::schema::{Schema, SchemaNamer};
use crate::tools::ToolSet;
use crate::types::{ChatMessage, ChatRequest, ChatRole, ThinkingConfig, TokenUsage};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// Heading under which schema guidance is appended to a prompt message
const SCHEMA_HEADER: &str = "#OUTPUT SCHEMA";

/// A successful structured extraction
#[derive(Debug)]
pub struct Extraction<T> {
    /// The decoded, optionally validated value
    pub value: T,
    /// The payload text the value was decoded from
    pub raw: String,
    /// Usage accumulated across every attempt and tool round
    pub usage: TokenUsage,
    /// 1 = succeeded on the first attempt
    pub attempts: u32,
}

/// The synchronous structured-extraction entry point.
///
/// Owns one provider adapter plus the per-call policy: mode, retry budget,
/// validation, tool set, conversation memory. Create via
/// [`Extractor::builder`].
pub struct Extractor {
    pub(crate) adapter: Arc<dyn ProviderAdapter>,
    pub(crate) mode: Mode,
    pub(crate) max_retries: u32,
    pub(crate) validate: bool,
    pub(crate) verbose: bool,
    pub(crate) namer: SchemaNamer,
    pub(crate) thinking: Option<ThinkingConfig>,
    pub(crate) extra_body: Option<HashMap<String, serde_json::Value>>,
    pub(crate) tools: ToolSet,
    pub(crate) memory: Option<Memory>,
    pub(crate) max_tool_rounds: u32,
}

/// Builder for [`Extractor`]
pub struct ExtractorBuilder {
    adapter: Arc<dyn ProviderAdapter>,
    mode: Mode,
    max_retries: u32,
    validate: bool,
    verbose: bool,
    namer: SchemaNamer,
    thinking: Option<ThinkingConfig>,
    extra_body: Option<HashMap<String, serde_json::Value>>,
    tools: ToolSet,
    memory: Option<Memory>,
    max_tool_rounds: u32,
}

impl ExtractorBuilder {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validate decoded values against the schema before accepting them
    pub fn with_validation(mut self) -> Self {
        self.validate = true;
        self
    }

    /// Log every attempt's request and raw response at debug level
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn schema_namer(mut self, namer: SchemaNamer) -> Self {
        self.namer = namer;
        self
    }

    pub fn thinking(mut self, thinking: ThinkingConfig) -> Self {
        self.thinking = Some(thinking);
        self
    }

    /// Extra body fields merged into every provider payload
    pub fn extra_body(mut self, extra: HashMap<String, serde_json::Value>) -> Self {
        self.extra_body = Some(extra);
        self
    }

    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a shared conversation log
    pub fn memory(mut self, memory: Memory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Bound on tool-resolution rounds within one call
    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn build(self) -> Extractor {
        Extractor {
            adapter: self.adapter,
            mode: self.mode,
            max_retries: self.max_retries,
            validate: self.validate,
            verbose: self.verbose,
            namer: self.namer,
            thinking: self.thinking,
            extra_body: self.extra_body,
            tools: self.tools,
            memory: self.memory,
            max_tool_rounds: self.max_tool_rounds,
        }
    }
}

impl Extractor {
    pub fn builder(adapter: Arc<dyn ProviderAdapter>) -> ExtractorBuilder {
        ExtractorBuilder {
            adapter,
            mode: Mode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            validate: false,
            verbose: false,
            namer: SchemaNamer::default(),
            thinking: None,
            extra_body: None,
            tools: ToolSet::new(),
            memory: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Shorthand for an extractor with all defaults
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self::builder(adapter).build()
    }

    pub fn provider(&self) -> &'static str {
        self.adapter.name()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn validation_enabled(&self) -> bool {
        self.validate
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Fail fast on (mode, provider) combinations the adapter rules out
    pub(crate) fn check_mode(&self) -> Result<(), ExtractError> {
        if self.adapter.supports_mode(self.mode) {
            Ok(())
        } else {
            Err(ExtractError::unsupported_mode(self.adapter.name(), self.mode))
        }
    }

    /// Shape the caller's request for one provider round-trip.
    ///
    /// Looked up once per call from the mode plan; retries reuse the result
    /// verbatim.
    pub(crate) fn shape_request(
        &self,
        request: &ChatRequest,
        schema: &Schema,
        context: Option<&str>,
    ) -> ProviderRequest {
        let plan = self.mode.plan();
        let mut messages = request.messages.clone();
        let mut tools = Vec::new();
        let mut strict_tools = false;
        let mut response_format = ResponseFormat::Text;

        match plan.guidance {
            SchemaGuidance::Tools { strict } => {
                tools = schema.functions().to_vec();
                strict_tools = strict;
            }
            SchemaGuidance::ResponseFormat { strict } => {
                response_format = ResponseFormat::JsonSchema {
                    name: schema.name().to_string(),
                    schema: schema.root().clone(),
                    strict,
                };
            }
            SchemaGuidance::Prompt => {
                if let Some(context) = context {
                    append_context(&mut messages, context);
                }
                if plan.wire == WireFormat::Json {
                    response_format = ResponseFormat::JsonObject;
                }
            }
        }

        // Registered tools ride along except when the schema itself is the
        // tool declaration
        if tools.is_empty() && !self.tools.is_empty() {
            tools = self.tools.definitions();
        }

        let mut extra_body = self.extra_body.clone();
        if let Some(params) = &request.extra_params {
            extra_body
                .get_or_insert_with(HashMap::new)
                .extend(params.clone());
        }

        ProviderRequest {
            messages,
            tools,
            strict_tools,
            response_format,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            thinking: self.thinking.clone(),
            extra_body,
        }
    }

    /// Synchronous structured extraction with bounded retries.
    ///
    /// Only decode and validation failures consume the retry budget; each
    /// retry resends the identical shaped request. Transport errors and
    /// missing tool calls propagate immediately. Usage accumulates across
    /// every attempt, successful or not, and terminal exhaustion returns it
    /// inside [`ExtractError::RetriesExhausted`].
    pub async fn chat<T>(&self, request: ChatRequest) -> Result<Extraction<T>, ExtractError>
    where
        T: Serialize + DeserializeOwned + schemars::JsonSchema + Send + Sync + 'static,
    {
        self.check_mode()?;
        let plan = self.mode.plan();
        let schema = Schema::of::<T>(&self.namer)?;
        let mut encoder = encoding::encoder_for_mode::<T>(self.mode, &schema)?;
        if self.validate {
            encoder.enable_validation();
        }
        let context = encoder.context();
        let shaped = self.shape_request(&request, &schema, context.as_deref());

        if let Some(memory) = &self.memory {
            if let Some(last) = shaped.messages.last() {
                memory.add([last.clone()]);
            }
        }

        let mut usage = TokenUsage::default();
        for attempt in 0..=self.max_retries {
            if self.verbose {
                log::debug!(
                    "{} request(attempt:{attempt}): {shaped:?}",
                    self.adapter.name()
                );
            }

            let response = self.invoke_resolving_tools(&shaped, &mut usage).await?;
            if self.verbose {
                log::debug!(
                    "{} response(attempt:{attempt}): {}",
                    self.adapter.name(),
                    response.text
                );
            }

            let payload = match plan.payload {
                PayloadSource::ToolCalls => match tool_call_payload(&response) {
                    Ok(payload) => payload,
                    Err(err @ ExtractError::NoToolCall) => return Err(err),
                    Err(err) => {
                        log::debug!("tool-call payload error(attempt:{attempt}): {err}");
                        continue;
                    }
                },
                PayloadSource::Text => response.text.clone(),
            };

            let value = match encoder.unmarshal(&payload) {
                Ok(value) => value,
                Err(err) => {
                    log::debug!("decode error(attempt:{attempt}): {err}");
                    continue;
                }
            };
            if let Err(err) = encoder.validate(&value) {
                log::debug!("validation error(attempt:{attempt}): {err}");
                continue;
            }

            if let Some(memory) = &self.memory {
                memory.add([ChatMessage::assistant(payload.clone())]);
            }
            return Ok(Extraction {
                value,
                raw: payload,
                usage,
                attempts: attempt + 1,
            });
        }

        Err(ExtractError::RetriesExhausted {
            attempts: self.max_retries + 1,
            usage,
        })
    }

    /// One provider round-trip, transparently resolving registered tool
    /// calls until the model answers without them.
    ///
    /// The continuation request and running usage are the explicit
    /// accumulators; the round bound guards against models that loop on
    /// tool calls. In tool-call payload modes the calls *are* the payload
    /// and are returned untouched.
    pub(crate) async fn invoke_resolving_tools(
        &self,
        shaped: &ProviderRequest,
        usage: &mut TokenUsage,
    ) -> Result<ProviderResponse, ExtractError> {
        let mut current = shaped.clone();
        for _round in 0..self.max_tool_rounds {
            let response = self.adapter.invoke(&current).await?;
            *usage += response.usage;

            let resolve_here = self.mode.plan().payload == PayloadSource::Text
                && !response.tool_calls.is_empty()
                && !self.tools.is_empty();
            if !resolve_here {
                return Ok(response);
            }

            let assistant = ChatMessage::tool_uses(response.tool_calls.clone());
            current.messages.push(assistant.clone());
            let mut appended = vec![assistant];
            for call in &response.tool_calls {
                let result = match self.tools.resolve(call).await {
                    Some(result) => result,
                    None => ToolSet::unknown_tool_result(call),
                };
                if self.verbose {
                    log::debug!("tool {} -> {}", call.name, result.content);
                }
                let message = ChatMessage::tool_result(result);
                current.messages.push(message.clone());
                appended.push(message);
            }
            if let Some(memory) = &self.memory {
                memory.add(appended);
            }
        }
        Err(ExtractError::ToolLoopExceeded {
            rounds: self.max_tool_rounds,
        })
    }
}

/// Locate the payload in a tool-call-mode response: one call yields its
/// argument blob, several yield a JSON array of the argument objects.
fn tool_call_payload(response: &ProviderResponse) -> Result<String, ExtractError> {
    match response.tool_calls.len() {
        0 => Err(ExtractError::NoToolCall),
        1 => Ok(response.tool_calls[0].arguments.clone()),
        _ => {
            let mut objects = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let value: serde_json::Value =
                    serde_json::from_str(&call.arguments).map_err(|e| {
                        ExtractError::decode(
                            format!("tool call arguments: {e}"),
                            call.arguments.clone(),
                        )
                    })?;
                objects.push(value);
            }
            Ok(serde_json::Value::Array(objects).to_string())
        }
    }
}

/// Append schema guidance to the system message, falling back to the last
/// user message when the request has no system turn
fn append_context(messages: &mut [ChatMessage], context: &str) {
    if let Some(system) = messages
        .iter_mut()
        .find(|message| message.role == ChatRole::System)
    {
        system.content = format!("{}\n\n{SCHEMA_HEADER}\n{context}", system.content);
        return;
    }
    if let Some(user) = messages
        .iter_mut()
        .rev()
        .find(|message| message.role == ChatRole::User)
    {
        user.content = format!("{}\n\n{SCHEMA_HEADER}\n{context}", user.content);
    }
}
