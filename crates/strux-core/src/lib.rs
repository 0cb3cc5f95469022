//! # strux-core - Structured LLM Extraction
//!
//! A Rust library for extracting schema-conforming values from large
//! language models instead of free text. Define the target type, pick an
//! invocation mode, and the pipeline handles schema injection, payload
//! cleanup, decoding, validation, and bounded retries, synchronously or as
//! a live stream of decoded elements.
//!
//! ## Features
//!
//! - **Typed extraction** - derive a schema from any `serde` +
//!   [`schemars`]-enabled type and get a decoded value back
//! - **Eight invocation modes** - native tool calling, server-enforced JSON
//!   schema, and prompt-guided JSON/YAML/TOML/plain text
//! - **Lenient payload cleanup** - prose and code-fence wrapping around the
//!   payload is stripped before decoding, never treated as an error
//! - **Bounded retries** - only decode/validation failures consume the
//!   retry budget; transport errors surface immediately
//! - **Streaming** - thinking/content/tool-call events on one channel,
//!   decoded instances on another, emitted as soon as each block completes
//! - **Tool resolution** - registered tools are executed mid-call (with a
//!   round bound) and the conversation re-invoked transparently
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//! use strux_core::{ChatRequestBuilder, Extractor, Mode, OpenAiAdapter, OpenAiConfig};
//!
//! #[derive(Debug, Serialize, Deserialize, JsonSchema)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = OpenAiAdapter::new(OpenAiConfig::new("your-api-key", "gpt-4o-mini"))?;
//!     let extractor = Extractor::builder(Arc::new(adapter))
//!         .mode(Mode::Json)
//!         .max_retries(2)
//!         .with_validation()
//!         .build();
//!
//!     let request = ChatRequestBuilder::new()
//!         .user("extract: Robby is 22 years old")
//!         .build();
//!     let extraction = extractor.chat::<Person>(request).await?;
//!     println!("{} is {}", extraction.value.name, extraction.value.age);
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! [`Extractor::schema_stream`] segments the live token stream into decoded
//! instances without waiting for stream end:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use schemars::JsonSchema;
//! # use serde::{Deserialize, Serialize};
//! # use strux_core::{ChatRequestBuilder, Extractor, Mode, OpenAiAdapter, OpenAiConfig};
//! # #[derive(Debug, Serialize, Deserialize, JsonSchema)]
//! # struct Person { name: String, age: u32 }
//! # async fn demo(extractor: Extractor) -> Result<(), strux_core::ExtractError> {
//! let request = ChatRequestBuilder::new().user("list five people").build();
//! let mut session = extractor.schema_stream::<Person>(request).await?;
//! while let Some(person) = session.items.recv().await {
//!     println!("got {person:?}");
//! }
//! println!("usage: {:?}", session.usage.snapshot());
//! # Ok(())
//! # }
//! ```
//!
//! Malformed stream elements are dropped and segmentation continues; the
//! stream favors availability over completeness.
//!
//! ## Error Handling
//!
//! Every operation returns [`Result<T, ExtractError>`](ExtractError).
//! Decode and validation failures are swallowed until the retry budget is
//! exhausted, then surface as
//! [`RetriesExhausted`](ExtractError::RetriesExhausted) carrying the usage
//! accumulated across all attempts. Transport failures, schema-reflection
//! failures, unsupported (mode, provider) pairs, and missing tool calls
//! propagate immediately.

pub mod adapter;
pub mod config;
pub mod encoding;
pub mod error;
pub mod extractor;
pub mod memory;
pub mod mode;
pub mod providers;
pub mod schema;
pub mod stream;
pub mod tools;
pub mod types;
pub mod utils;


pub use adapter::{
    EventStream, ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponse, ResponseFormat,
};
pub use config::OpenAiConfig;
pub use error::ExtractError;
pub use extractor::{
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOOL_ROUNDS, Extraction, Extractor, ExtractorBuilder,
};
pub use memory::Memory;
pub use mode::Mode;
pub use providers::OpenAiAdapter;
pub use schema::{FunctionDefinition, Schema, SchemaNamer};
pub use stream::{SchemaStreamSession, SharedUsage, StreamSession};
pub use tools::{ToolCall, ToolExecutor, ToolSet};
pub use types::{
    ChatMessage, ChatRequest, ChatRequestBuilder, ChatRole, StreamData, ThinkingConfig,
    TokenUsage, ToolResult, ToolUse,
};
pub use utils::sse::sse_data_lines;

// Re-export the derive surface a target type needs
pub use schemars::JsonSchema;
pub use serde::{Deserialize, Serialize};
