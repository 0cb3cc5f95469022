//! Test doubles for exercising the pipeline without a live provider.
//!
//! [`MockAdapter`] queues canned responses/streams and records every shaped
//! request it receives; `fake_sse_bytes` builds SSE byte streams with
//! controllable chunk boundaries for parser tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::Stream;

use crate::adapter::{
    EventStream, ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponse,
};
use crate::error::ExtractError;
use crate::mode::Mode;
use crate::types::{TokenUsage, ToolUse};

/// Queue-driven provider adapter for tests.
///
/// Synchronous invocations pop from the response queue, streaming
/// invocations from the stream queue; an exhausted queue yields a transport
/// error so a test that over-invokes fails loudly instead of hanging.
#[derive(Default)]
pub struct MockAdapter {
    unsupported: Vec<Mode>,
    responses: Mutex<VecDeque<Result<ProviderResponse, ExtractError>>>,
    streams: Mutex<VecDeque<Vec<Result<ProviderEvent, ExtractError>>>>,
    calls: Mutex<Vec<ProviderRequest>>,
    stream_calls: Mutex<Vec<ProviderRequest>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a mode this adapter rejects in its capability check
    pub fn without_mode(mut self, mode: Mode) -> Self {
        self.unsupported.push(mode);
        self
    }

    pub fn queue_response(&self, response: ProviderResponse) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Ok(response));
    }

    /// Queue a plain text completion
    pub fn queue_text(&self, text: &str, usage: TokenUsage) {
        self.queue_response(ProviderResponse {
            text: text.to_string(),
            usage,
            model: "mock-model".to_string(),
            ..Default::default()
        });
    }

    /// Queue a completion answering through tool calls
    pub fn queue_tool_calls(&self, tool_calls: Vec<ToolUse>, usage: TokenUsage) {
        self.queue_response(ProviderResponse {
            tool_calls,
            usage,
            model: "mock-model".to_string(),
            ..Default::default()
        });
    }

    pub fn queue_error(&self, error: ExtractError) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Err(error));
    }

    pub fn queue_stream(&self, events: Vec<Result<ProviderEvent, ExtractError>>) {
        self.streams
            .lock()
            .expect("mock lock poisoned")
            .push_back(events);
    }

    /// Number of synchronous invocations so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock lock poisoned").len()
    }

    /// Every shaped request passed to `invoke`, in order
    pub fn recorded_calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    /// Number of stream openings so far
    pub fn stream_count(&self) -> usize {
        self.stream_calls.lock().expect("mock lock poisoned").len()
    }

    /// Every shaped request passed to `invoke_streaming`, in order
    pub fn recorded_streams(&self) -> Vec<ProviderRequest> {
        self.stream_calls.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports_mode(&self, mode: Mode) -> bool {
        !self.unsupported.contains(&mode)
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ExtractError> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ExtractError::transport("mock: response queue exhausted")))
    }

    async fn invoke_streaming(
        &self,
        request: &ProviderRequest,
    ) -> Result<EventStream, ExtractError> {
        self.stream_calls
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());
        let events = self
            .streams
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .ok_or_else(|| ExtractError::transport("mock: stream queue exhausted"))?;
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Build an SSE byte stream from event payloads, optionally re-chunked to
/// exercise partial-frame handling
pub fn fake_sse_bytes(
    events: &[&str],
    chunk_size: Option<usize>,
) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    let mut wire = String::new();
    for event in events {
        wire.push_str(&format!("data: {event}\n\n"));
    }
    let bytes = wire.into_bytes();
    let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = match chunk_size {
        Some(size) if size > 0 => bytes
            .chunks(size)
            .map(|chunk| Ok(bytes::Bytes::copy_from_slice(chunk)))
            .collect(),
        _ => vec![Ok(bytes::Bytes::from(bytes))],
    };
    futures::stream::iter(chunks)
}
