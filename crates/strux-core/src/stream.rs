//! Streaming extraction.
//!
//! One background task owns the provider's live stream and multiplexes
//! [`StreamData`] events onto a bounded channel; `schema_stream` layers a
//! second stage on top that feeds `Content` events through a
//! [`StreamEncoder`](crate::encoding::StreamEncoder) and emits decoded
//! instances on their own channel.
//!
//! Tool-call fragments are assembled per index slot while streaming. When
//! the provider signals end-of-turn with assembled calls, each call is
//! resolved through the registered tool set and the orchestrator re-invokes
//! itself with the augmented conversation, splicing the continuation's
//! events onto the same outward channel. A call whose tool has no executor
//! is surfaced unresolved and ends the stream; the caller owns execution
//! and starts the next turn.
//!
//! Dropping the receivers cancels the whole call tree: every send fails and
//! the tasks unwind without explicit cleanup. Accumulated usage is written
//! before the events channel closes.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{Future, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::adapter::{ProviderAdapter, ProviderEvent, ProviderRequest};
use crate::encoding::{self, Encoder};
use crate::error::ExtractError;
use crate::extractor::Extractor;
use crate::memory::Memory;
use crate::mode::SchemaGuidance;
use crate::schema::Schema;
use crate::tools::{ToolCall, ToolSet};
use crate::types::{ChatMessage, ChatRequest, StreamData, TokenUsage, ToolUse};

const CHANNEL_CAPACITY: usize = 32;

/// Usage shared between a streaming task tree and its caller.
///
/// Grows monotonically; complete once the events channel has closed.
#[derive(Debug, Clone, Default)]
pub struct SharedUsage(Arc<Mutex<TokenUsage>>);

impl SharedUsage {
    pub fn snapshot(&self) -> TokenUsage {
        *self.0.lock().expect("usage lock poisoned")
    }

    fn add(&self, usage: TokenUsage) {
        *self.0.lock().expect("usage lock poisoned") += usage;
    }
}

/// A live event stream with schema context injected but no structural
/// decoding
#[derive(Debug)]
pub struct StreamSession {
    pub events: mpsc::Receiver<StreamData>,
    pub usage: SharedUsage,
}

/// A live event stream plus the structural decoding overlay
#[derive(Debug)]
pub struct SchemaStreamSession<T> {
    /// Decoded instances, emitted as soon as each block completes
    pub items: mpsc::Receiver<T>,
    pub events: mpsc::Receiver<StreamData>,
    pub usage: SharedUsage,
}

/// The cloneable slice of an [`Extractor`] a streaming task tree needs
#[derive(Clone)]
struct StreamWorker {
    adapter: Arc<dyn ProviderAdapter>,
    tools: ToolSet,
    memory: Option<Memory>,
    verbose: bool,
    max_tool_rounds: u32,
}

impl StreamWorker {
    fn remember(&self, messages: Vec<ChatMessage>) {
        if let Some(memory) = &self.memory {
            memory.add(messages);
        }
    }

    /// Drive one provider stream, then recurse for tool continuations.
    ///
    /// Boxed because the continuation re-enters this function; the round
    /// budget is the explicit recursion bound.
    fn run(
        self,
        request: ProviderRequest,
        tx: mpsc::Sender<StreamData>,
        usage: SharedUsage,
        rounds_left: u32,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if self.verbose {
                log::debug!("{} stream request: {request:?}", self.adapter.name());
            }
            let mut stream = match self.adapter.invoke_streaming(&request).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(StreamData::Error(err)).await;
                    return;
                }
            };

            let mut slots: BTreeMap<u32, ToolUse> = BTreeMap::new();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(ProviderEvent::Content(text)) => {
                        if tx.send(StreamData::Content(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(ProviderEvent::Thinking(text)) => {
                        if tx.send(StreamData::Thinking(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(ProviderEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments,
                    }) => {
                        let slot = slots.entry(index).or_default();
                        if let Some(id) = id {
                            if !id.is_empty() {
                                slot.id = id;
                            }
                        }
                        if let Some(name) = name {
                            if !name.is_empty() {
                                slot.name = name;
                            }
                        }
                        slot.arguments.push_str(&arguments);
                    }
                    Ok(ProviderEvent::Usage(u)) => usage.add(u),
                    Err(err) => {
                        let _ = tx.send(StreamData::Error(err)).await;
                        return;
                    }
                }
            }
            drop(stream);

            if slots.is_empty() {
                return;
            }

            // End-of-turn with assembled tool calls
            let calls: Vec<ToolUse> = slots.into_values().collect();
            let mut request = request;
            let assistant = ChatMessage::tool_uses(calls.clone());
            request.messages.push(assistant.clone());
            let mut appended = vec![assistant];

            for call in calls {
                match self.tools.resolve(&call).await {
                    Some(result) => {
                        let message = ChatMessage::tool_result(result.clone());
                        request.messages.push(message.clone());
                        appended.push(message);
                        let event = StreamData::ToolCall(ToolCall {
                            request: call,
                            result: Some(result),
                        });
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        // Caller-owned tool: hand the request over and end
                        // the stream; the caller starts the next turn.
                        let _ = tx
                            .send(StreamData::ToolCall(ToolCall {
                                request: call,
                                result: None,
                            }))
                            .await;
                        self.remember(appended);
                        return;
                    }
                }
            }
            self.remember(appended);

            if rounds_left == 0 {
                let _ = tx
                    .send(StreamData::Error(ExtractError::ToolLoopExceeded {
                        rounds: self.max_tool_rounds,
                    }))
                    .await;
                return;
            }
            self.run(request, tx, usage, rounds_left - 1).await;
        })
    }
}

impl Extractor {
    fn stream_worker(&self) -> StreamWorker {
        StreamWorker {
            adapter: Arc::clone(&self.adapter),
            tools: self.tools.clone(),
            memory: self.memory.clone(),
            verbose: self.verbose,
            max_tool_rounds: self.max_tool_rounds,
        }
    }

    fn remember_request(&self, shaped: &ProviderRequest) {
        if let Some(memory) = &self.memory {
            if let Some(last) = shaped.messages.last() {
                memory.add([last.clone()]);
            }
        }
    }

    /// Raw token/event stream with schema context injected but no
    /// structural decoding.
    ///
    /// In tool-call payload modes the structured payload surfaces as
    /// [`StreamData::ToolCall`] events rather than `Content`.
    pub async fn stream<T>(&self, request: ChatRequest) -> Result<StreamSession, ExtractError>
    where
        T: Serialize + DeserializeOwned + schemars::JsonSchema + Send + Sync + 'static,
    {
        self.check_mode()?;
        let schema = Schema::of::<T>(&self.namer)?;
        let encoder = encoding::encoder_for_mode::<T>(self.mode, &schema)?;
        let context = encoder.context();
        let shaped = self.shape_request(&request, &schema, context.as_deref());
        self.remember_request(&shaped);

        let usage = SharedUsage::default();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(
            self.stream_worker()
                .run(shaped, tx, usage.clone(), self.max_tool_rounds),
        );
        Ok(StreamSession { events: rx, usage })
    }

    /// Structural decoding overlay on top of [`stream`](Extractor::stream):
    /// `Content` events additionally feed the mode's stream segmenter, and
    /// every completed element is decoded onto the `items` channel.
    pub async fn schema_stream<T>(
        &self,
        request: ChatRequest,
    ) -> Result<SchemaStreamSession<T>, ExtractError>
    where
        T: Serialize + DeserializeOwned + schemars::JsonSchema + Send + Sync + 'static,
    {
        self.check_mode()?;
        let schema = Schema::of::<T>(&self.namer)?;
        let mut segmenter = encoding::stream_encoder_for_mode::<T>(self.mode, &schema)?;
        if self.validate {
            segmenter.enable_validation();
        }

        // Server-side schema enforcement has to describe the multi-element
        // envelope, not a single element
        let shaped_schema = match self.mode.plan().guidance {
            SchemaGuidance::ResponseFormat { .. } => schema.wrap_as_items(&self.namer)?,
            _ => schema.clone(),
        };
        let context = segmenter.context();
        let shaped = self.shape_request(&request, &shaped_schema, context.as_deref());
        self.remember_request(&shaped);

        let usage = SharedUsage::default();
        let (inner_tx, mut inner_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (items_tx, items_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(
            self.stream_worker()
                .run(shaped, inner_tx, usage.clone(), self.max_tool_rounds),
        );
        tokio::spawn(async move {
            while let Some(data) = inner_rx.recv().await {
                if let StreamData::Content(fragment) = &data {
                    for item in segmenter.push(fragment) {
                        let _ = items_tx.send(item).await;
                    }
                }
                let _ = events_tx.send(data).await;
            }
            for item in segmenter.finish() {
                let _ = items_tx.send(item).await;
            }
        });

        Ok(SchemaStreamSession {
            items: items_rx,
            events: events_rx,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::schema::FunctionDefinition;
    use crate::utils::test_helpers::MockAdapter;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Person {
        name: String,
        age: u32,
    }

    fn content(text: &str) -> ProviderEvent {
        ProviderEvent::Content(text.to_string())
    }

    #[tokio::test]
    async fn events_preserve_provider_order() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.queue_stream(vec![
            Ok(ProviderEvent::Thinking("hmm".into())),
            Ok(content("hello ")),
            Ok(content("world")),
            Ok(ProviderEvent::Usage(TokenUsage::new(7, 3))),
        ]);
        let extractor = Extractor::builder(adapter).mode(Mode::Json).build();

        let mut session = extractor
            .stream::<Person>(ChatRequest {
                messages: vec![ChatMessage::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(event) = session.events.recv().await {
            seen.push(match event {
                StreamData::Thinking(t) => format!("think:{t}"),
                StreamData::Content(t) => format!("content:{t}"),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(seen, ["think:hmm", "content:hello ", "content:world"]);
        assert_eq!(session.usage.snapshot(), TokenUsage::new(7, 3));
    }

    #[tokio::test]
    async fn schema_stream_decodes_blocks_as_they_complete() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.queue_stream(vec![
            Ok(content("name: Ada\nag")),
            Ok(content("e: 36\n\nname: Grace\nage: 45\n")),
        ]);
        let extractor = Extractor::builder(adapter).mode(Mode::Yaml).build();

        let mut session = extractor
            .schema_stream::<Person>(ChatRequest {
                messages: vec![ChatMessage::user("people")],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut people = Vec::new();
        while let Some(person) = session.items.recv().await {
            people.push(person);
        }
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].name, "Ada");
        assert_eq!(people[1].age, 45);
    }

    #[tokio::test]
    async fn schema_stream_rejects_plain_text_mode() {
        let adapter = Arc::new(MockAdapter::new());
        let extractor = Extractor::builder(adapter).mode(Mode::PlainText).build();

        let err = extractor
            .schema_stream::<Person>(ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedMode { .. }));
    }

    #[tokio::test]
    async fn unsupported_mode_fails_before_any_invocation() {
        let adapter = Arc::new(MockAdapter::new().without_mode(Mode::Toml));
        let extractor = Extractor::builder(adapter.clone()).mode(Mode::Toml).build();

        let err = extractor
            .stream::<Person>(ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedMode { .. }));
        assert_eq!(adapter.stream_count(), 0);
    }

    #[tokio::test]
    async fn tool_calls_are_assembled_resolved_and_continued() {
        let adapter = Arc::new(MockAdapter::new());
        // First turn: the model asks for a tool, arguments split across deltas
        adapter.queue_stream(vec![
            Ok(ProviderEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("lookup".into()),
                arguments: r#"{"q":"#.into(),
            }),
            Ok(ProviderEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: r#""rust"}"#.into(),
            }),
            Ok(ProviderEvent::Usage(TokenUsage::new(10, 2))),
        ]);
        // Continuation turn: the model answers
        adapter.queue_stream(vec![
            Ok(content("all done")),
            Ok(ProviderEvent::Usage(TokenUsage::new(20, 5))),
        ]);

        let mut tools = ToolSet::new();
        tools.register_fn(
            FunctionDefinition {
                name: "lookup".into(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            },
            |args| Ok(format!("results for {}", args["q"].as_str().unwrap())),
        );
        let extractor = Extractor::builder(adapter.clone())
            .mode(Mode::Json)
            .tools(tools)
            .build();

        let mut session = extractor
            .stream::<Person>(ChatRequest {
                messages: vec![ChatMessage::user("look up rust")],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut tool_events = 0;
        let mut text = String::new();
        while let Some(event) = session.events.recv().await {
            match event {
                StreamData::ToolCall(call) => {
                    tool_events += 1;
                    assert_eq!(call.request.name, "lookup");
                    assert_eq!(call.request.arguments, r#"{"q":"rust"}"#);
                    assert_eq!(call.result.unwrap().content, "results for rust");
                }
                StreamData::Content(t) => text.push_str(&t),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(tool_events, 1);
        assert_eq!(text, "all done");
        // Usage spans both turns of the recursion
        assert_eq!(session.usage.snapshot(), TokenUsage::new(30, 7));
        assert_eq!(adapter.stream_count(), 2);

        // The continuation carried the assistant tool-use turn and the result
        let second_request = adapter.recorded_streams()[1].clone();
        assert!(second_request
            .messages
            .iter()
            .any(|m| !m.tool_uses.is_empty()));
        assert!(second_request
            .messages
            .iter()
            .any(|m| !m.tool_results.is_empty()));
    }

    #[tokio::test]
    async fn unregistered_tool_ends_the_stream_with_an_unresolved_call() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.queue_stream(vec![Ok(ProviderEvent::ToolCallDelta {
            index: 0,
            id: Some("call_9".into()),
            name: Some("external_tool".into()),
            arguments: "{}".into(),
        })]);
        let extractor = Extractor::builder(adapter.clone())
            .mode(Mode::Json)
            .build();

        let mut session = extractor
            .stream::<Person>(ChatRequest {
                messages: vec![ChatMessage::user("go")],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut unresolved = 0;
        while let Some(event) = session.events.recv().await {
            match event {
                StreamData::ToolCall(call) => {
                    assert!(call.result.is_none());
                    assert_eq!(call.request.name, "external_tool");
                    unresolved += 1;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(unresolved, 1);
        // No continuation turn was started
        assert_eq!(adapter.stream_count(), 1);
    }

    #[tokio::test]
    async fn stream_errors_surface_as_error_events() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.queue_stream(vec![
            Ok(content("partial")),
            Err(ExtractError::transport("connection lost")),
        ]);
        let extractor = Extractor::builder(adapter).mode(Mode::Json).build();

        let mut session = extractor
            .stream::<Person>(ChatRequest::default())
            .await
            .unwrap();

        let first = session.events.recv().await.unwrap();
        assert!(matches!(first, StreamData::Content(_)));
        let second = session.events.recv().await.unwrap();
        assert!(matches!(second, StreamData::Error(ExtractError::Transport { .. })));
        assert!(session.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_receivers_cancels_the_task_tree() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.queue_stream((0..1000).map(|i| Ok(content(&format!("chunk {i}\n")))).collect());
        let extractor = Extractor::builder(adapter).mode(Mode::Json).build();

        let session = extractor
            .stream::<Person>(ChatRequest::default())
            .await
            .unwrap();
        drop(session.events);
        // The worker unblocks on the closed channel; nothing to join on, the
        // yield just gives it a chance to run to completion.
        tokio::task::yield_now().await;
    }
}
