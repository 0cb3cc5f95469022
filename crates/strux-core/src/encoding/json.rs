use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Encoder, SchemaValidator, StreamEncoder};
use crate::error::ExtractError;
use crate::schema::Schema;

/// Strip conversational wrapping around a JSON payload.
///
/// Takes everything from the first `{`/`[` through the last `}`/`]`. When a
/// bracket side is missing the text passes through unchanged on that side;
/// decode then fails naturally.
pub fn cleanup_json(raw: &str) -> &str {
    let start = match (raw.find('{'), raw.find('[')) {
        (Some(obj), Some(arr)) => obj.min(arr),
        (Some(obj), None) => obj,
        (None, Some(arr)) => arr,
        (None, None) => 0,
    };
    let trimmed = &raw[start..];
    let end = match (trimmed.rfind('}'), trimmed.rfind(']')) {
        (Some(obj), Some(arr)) => obj.max(arr) + 1,
        (Some(obj), None) => obj + 1,
        (None, Some(arr)) => arr + 1,
        (None, None) => trimmed.len(),
    };
    &trimmed[..end]
}

/// JSON format strategy
pub struct JsonEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonEncoder<T> {
    pub fn new(schema: Schema) -> Result<Self, ExtractError> {
        let validator = SchemaValidator::new(&schema)?;
        Ok(Self {
            schema,
            validator,
            validate_enabled: false,
            _marker: PhantomData,
        })
    }
}

impl<T> Encoder<T> for JsonEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        Some(format!(
            "\nPlease respond with JSON matching this JSON schema:\n```json\n{}\n```\n\
             Return an instance of the JSON, not the schema itself.\n",
            self.schema.rendered()
        ))
    }

    fn marshal(&self, value: &T) -> Result<String, ExtractError> {
        serde_json::to_string(value).map_err(ExtractError::from)
    }

    fn unmarshal(&self, raw: &str) -> Result<T, ExtractError> {
        let cleaned = cleanup_json(raw);
        serde_json::from_str(cleaned).map_err(|e| ExtractError::decode(e.to_string(), raw))
    }

    fn enable_validation(&mut self) {
        self.validate_enabled = true;
    }

    fn validate(&self, value: &T) -> Result<(), ExtractError> {
        if !self.validate_enabled {
            return Ok(());
        }
        self.validator.check(value)
    }
}

/// Byte length of the first complete JSON value at the start of `s`, or
/// `None` while it is still partial. Scalar values need a terminator
/// (`,`, `]`, `}`) before they count as complete.
fn complete_value_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    match bytes.first()? {
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (i, &b) in bytes.iter().enumerate() {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match b {
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(i + 1);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        b'"' => {
            let mut escaped = false;
            for (i, &b) in bytes.iter().enumerate().skip(1) {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    return Some(i + 1);
                }
            }
            None
        }
        _ => bytes
            .iter()
            .position(|&b| matches!(b, b',' | b']' | b'}')),
    }
}

/// Segments a streamed `{"items": [...]}` envelope into decoded elements.
///
/// Input before the array opens is consumed and discarded; after that, each
/// brace-balanced element is decoded the moment its closing bracket arrives.
pub struct JsonStreamEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    buffer: String,
    in_array: bool,
    array_done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStreamEncoder<T> {
    pub fn new(schema: Schema) -> Result<Self, ExtractError> {
        let validator = SchemaValidator::new(&schema)?;
        Ok(Self {
            schema,
            validator,
            validate_enabled: false,
            buffer: String::new(),
            in_array: false,
            array_done: false,
            _marker: PhantomData,
        })
    }
}

impl<T> JsonStreamEncoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn decode_element(&self, element: &str, out: &mut Vec<T>) {
        let Ok(value) = serde_json::from_str::<T>(element) else {
            return;
        };
        if self.validate_enabled && self.validator.check(&value).is_err() {
            return;
        }
        out.push(value);
    }

    fn drain_elements(&mut self, out: &mut Vec<T>) {
        while self.in_array && !self.array_done {
            let bytes = self.buffer.as_bytes();
            let mut idx = 0;
            while idx < bytes.len() && (bytes[idx].is_ascii_whitespace() || bytes[idx] == b',') {
                idx += 1;
            }
            if idx >= bytes.len() {
                self.buffer.clear();
                return;
            }
            if bytes[idx] == b']' {
                self.array_done = true;
                self.buffer.clear();
                return;
            }
            match complete_value_len(&self.buffer[idx..]) {
                Some(len) => {
                    let element = self.buffer[idx..idx + len].to_string();
                    self.buffer.drain(..idx + len);
                    self.decode_element(&element, out);
                }
                None => {
                    self.buffer.drain(..idx);
                    return;
                }
            }
        }
    }
}

impl<T> StreamEncoder<T> for JsonStreamEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        Some(format!(
            "\nPlease respond with a JSON object holding a single \"items\" array, where \
             every element matches this JSON schema:\n```json\n{}\n```\n\
             Return instances of the JSON, not the schema itself.\n",
            self.schema.rendered()
        ))
    }

    fn enable_validation(&mut self) {
        self.validate_enabled = true;
    }

    fn push(&mut self, fragment: &str) -> Vec<T> {
        let mut out = Vec::new();
        if self.array_done {
            return out;
        }
        self.buffer.push_str(fragment);
        if !self.in_array {
            if let Some(key) = self.buffer.find("\"items\"") {
                if let Some(bracket) = self.buffer[key..].find('[') {
                    self.buffer.drain(..key + bracket + 1);
                    self.in_array = true;
                }
            }
        }
        self.drain_elements(&mut out);
        out
    }

    fn finish(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        if self.array_done {
            return out;
        }
        if self.in_array {
            self.drain_elements(&mut out);
            return out;
        }
        // The envelope never materialized; fall back to treating the whole
        // leftover as a bare array of elements.
        let cleaned = cleanup_json(&self.buffer);
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(cleaned) {
            for value in values {
                if let Ok(text) = serde_json::to_string(&value) {
                    self.decode_element(&text, &mut out);
                }
            }
        }
        self.buffer.clear();
        out
    }
}
