use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Encoder, SchemaValidator, StreamEncoder, fake};
use crate::error::ExtractError;
use crate::schema::Schema;

const FENCE_OPEN: &str = "```yaml";
const FENCE_CLOSE: &str = "```";

/// Strip a fenced ```` ```yaml ```` block down to its contents.
///
/// Without an opening fence the whole text passes through; with an opening
/// fence but no closing one, everything after the opener is kept. Surrounding
/// whitespace is trimmed in every case.
pub fn cleanup_yaml(raw: &str) -> &str {
    cleanup_fenced(raw, FENCE_OPEN)
}

pub(super) fn cleanup_fenced<'a>(raw: &'a str, open: &str) -> &'a str {
    let Some(start) = raw.find(open) else {
        return raw.trim();
    };
    let after = &raw[start + open.len()..];
    match after.rfind(FENCE_CLOSE) {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// YAML format strategy.
///
/// The instruction block shows a realistic example instance rather than a
/// dry schema: either a caller-supplied example or schema-driven fake data.
/// Models follow a concrete example markedly better, and the randomness only
/// touches prompt content, never the decoded result.
pub struct YamlEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    example: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> YamlEncoder<T> {
    pub fn new(schema: Schema) -> Result<Self, ExtractError> {
        let validator = SchemaValidator::new(&schema)?;
        Ok(Self {
            schema,
            validator,
            validate_enabled: false,
            example: None,
            _marker: PhantomData,
        })
    }
}

impl<T: Serialize> YamlEncoder<T> {
    /// Use a caller-supplied example instance in the instruction block
    /// instead of generated fake data
    pub fn with_example(mut self, example: &T) -> Result<Self, ExtractError> {
        self.example = Some(marshal_yaml(example)?);
        Ok(self)
    }

    fn example_instance(&self) -> String {
        match &self.example {
            Some(example) => example.clone(),
            None => serde_yaml::to_string(&fake::instance(self.schema.root()))
                .unwrap_or_else(|_| self.schema.rendered().to_string()),
        }
    }
}

fn marshal_yaml<T: Serialize>(value: &T) -> Result<String, ExtractError> {
    serde_yaml::to_string(value)
        .map_err(|e| ExtractError::serialization("YAML serialization failed", e))
}

impl<T> Encoder<T> for YamlEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        Some(format!(
            "\nPlease respond with YAML shaped like the following example, without comments:\n\
             ```yaml\n{}```\n\
             Quote any field value that contains characters special to YAML.\n\
             Return an instance of the YAML, not a schema.\n",
            self.example_instance()
        ))
    }

    fn marshal(&self, value: &T) -> Result<String, ExtractError> {
        marshal_yaml(value)
    }

    fn unmarshal(&self, raw: &str) -> Result<T, ExtractError> {
        let cleaned = cleanup_yaml(raw);
        serde_yaml::from_str(cleaned).map_err(|e| ExtractError::decode(e.to_string(), raw))
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

/// Whether a line closes the current block: blank, an all-dash run, or a
/// code fence the model wrapped the payload in
pub(super) fn is_block_delimiter(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || (trimmed.len() >= 2 && trimmed.bytes().all(|b| b == b'-'))
        || trimmed.starts_with(FENCE_CLOSE)
}

/// Segments a streamed sequence of blank-line-delimited YAML documents.
///
/// Consecutive non-blank lines form one candidate block; a blank line (or
/// all-dash separator) closes it, triggering decode + optional validation.
/// Blocks that fail either are dropped and segmentation continues.
pub struct YamlStreamEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    buffer: String,
    block: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> YamlStreamEncoder<T> {
    pub fn new(schema: Schema) -> Result<Self, ExtractError> {
        let validator = SchemaValidator::new(&schema)?;
        Ok(Self {
            schema,
            validator,
            validate_enabled: false,
            buffer: String::new(),
            block: String::new(),
            _marker: PhantomData,
        })
    }
}

impl<T> YamlStreamEncoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn close_block(&mut self, out: &mut Vec<T>) {
        if self.block.trim().is_empty() {
            self.block.clear();
            return;
        }
        if let Ok(value) = serde_yaml::from_str::<T>(&self.block) {
            if !self.validate_enabled || self.validator.check(&value).is_ok() {
                out.push(value);
            }
        }
        self.block.clear();
    }
}

impl<T> StreamEncoder<T> for YamlStreamEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        let mut examples = String::new();
        for i in 0..3 {
            if i > 0 {
                examples.push_str("\n\n");
            }
            examples.push_str(
                &serde_yaml::to_string(&fake::instance(self.schema.root())).unwrap_or_default(),
            );
        }
        Some(format!(
            "\nPlease respond with a sequence of YAML documents shaped like the following \
             examples, one blank line between elements:\n```yaml\n{examples}\n```\n\
             Return instances of the YAML, not a schema.\n"
        ))
    }

    fn enable_validation(&mut self) {
        self.validate_enabled = true;
    }

    fn push(&mut self, fragment: &str) -> Vec<T> {
        self.buffer.push_str(fragment);
        let mut out = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = &line[..line.len() - 1];
            if is_block_delimiter(line) {
                self.close_block(&mut out);
            } else {
                self.block.push_str(line);
                self.block.push('\n');
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let leftover = std::mem::take(&mut self.buffer);
            if !is_block_delimiter(&leftover) {
                self.block.push_str(&leftover);
            }
        }
        self.close_block(&mut out);
        out
    }
}
