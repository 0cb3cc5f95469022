//! Format-specific encoding strategies.
//!
//! An [`Encoder`] renders schema guidance for the prompt, marshals values,
//! and repairs/decodes raw model output; a [`StreamEncoder`] additionally
//! segments an incremental fragment stream into discrete decoded elements.
//! Both are owned exclusively by one in-flight call.
//!
//! Cleanup-before-decode is deliberately lenient and never an error: models
//! wrap payloads in prose inconsistently, and failing hard on cosmetic
//! wrapping would burn the retry budget on formatting variance instead of
//! genuine schema violations.

pub mod fake;
mod json;
mod text;
mod toml;
mod yaml;

pub use json::{JsonEncoder, JsonStreamEncoder, cleanup_json};
pub use text::PlainTextEncoder;
pub use toml::{TomlEncoder, TomlStreamEncoder, cleanup_toml};
pub use yaml::{YamlEncoder, YamlStreamEncoder, cleanup_yaml};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ExtractError;
use crate::mode::{Mode, WireFormat};
use crate::schema::Schema;

/// Format strategy for one synchronous extraction call
pub trait Encoder<T>: Send + Sync {
    /// Natural-language instruction block carrying the schema guidance, to
    /// be appended to a system/user message. `None` when the format needs
    /// no prompt-side guidance.
    fn context(&self) -> Option<String>;

    /// Render a value to provider-ready text
    fn marshal(&self, value: &T) -> Result<String, ExtractError>;

    /// Repair raw model output and decode it into the target type
    fn unmarshal(&self, raw: &str) -> Result<T, ExtractError>;

    /// Turn on semantic validation for this call. Once enabled it stays
    /// enabled.
    fn enable_validation(&mut self);

    /// Validate a decoded value; a no-op pass-through until
    /// [`enable_validation`](Encoder::enable_validation) is called
    fn validate(&self, value: &T) -> Result<(), ExtractError>;
}

/// Format strategy for one streaming extraction call.
///
/// Fragments are pushed as they arrive; each complete block is decoded and
/// (optionally) validated as soon as it is recognized. Blocks that fail to
/// decode or validate are dropped silently; the stream is best-effort per
/// element, not per-stream.
pub trait StreamEncoder<T>: Send {
    /// Instruction block describing the expected multi-element wire shape
    fn context(&self) -> Option<String>;

    /// Turn on per-element semantic validation
    fn enable_validation(&mut self);

    /// Append a fragment and drain every element completed by it
    fn push(&mut self, fragment: &str) -> Vec<T>;

    /// Treat the leftover buffer as a final implicit block
    fn finish(&mut self) -> Vec<T>;
}

/// Build the encoder matching a mode's wire format
pub fn encoder_for_mode<T>(mode: Mode, schema: &Schema) -> Result<Box<dyn Encoder<T>>, ExtractError>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match mode.plan().wire {
        WireFormat::Json => Ok(Box::new(JsonEncoder::new(schema.clone())?)),
        WireFormat::Yaml => Ok(Box::new(YamlEncoder::new(schema.clone())?)),
        WireFormat::Toml => Ok(Box::new(TomlEncoder::new(schema.clone())?)),
        WireFormat::Text => Ok(Box::new(PlainTextEncoder::new())),
    }
}

/// Build the stream encoder matching a mode's wire format.
///
/// Plain text has no decodable element shape, so `schema_stream` rejects it;
/// the untyped `stream` entry point covers that mode.
pub fn stream_encoder_for_mode<T>(
    mode: Mode,
    schema: &Schema,
) -> Result<Box<dyn StreamEncoder<T>>, ExtractError>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match mode.plan().wire {
        WireFormat::Json => Ok(Box::new(JsonStreamEncoder::new(schema.clone())?)),
        WireFormat::Yaml => Ok(Box::new(YamlStreamEncoder::new(schema.clone())?)),
        WireFormat::Toml => Ok(Box::new(TomlStreamEncoder::new(schema.clone())?)),
        WireFormat::Text => Err(ExtractError::unsupported_mode("schema_stream", mode)),
    }
}

/// Schema-backed validator shared by the JSON/YAML/TOML encoders.
///
/// Owned by the encoder that uses it and compiled once at creation time;
/// there is no process-wide validator instance.
pub(crate) struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub(crate) fn new(schema: &Schema) -> Result<Self, ExtractError> {
        let validator = jsonschema::validator_for(schema.root())
            .map_err(|e| ExtractError::schema_reflection(format!("invalid schema: {e}")))?;
        Ok(Self { validator })
    }

    pub(crate) fn check<T: Serialize>(&self, value: &T) -> Result<(), ExtractError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ExtractError::serialization("value is not representable as JSON", e))?;
        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::validation(errors.join("; ")))
        }
    }
}
