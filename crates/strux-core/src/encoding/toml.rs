use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Encoder, SchemaValidator, StreamEncoder, fake, yaml::cleanup_fenced};
use crate::error::ExtractError;
use crate::schema::Schema;

const FENCE_OPEN: &str = "```toml";

/// Strip a fenced ```` ```toml ```` block down to its contents; same lenient
/// rules as the YAML cleaner.
pub fn cleanup_toml(raw: &str) -> &str {
    cleanup_fenced(raw, FENCE_OPEN)
}

/// TOML format strategy
pub struct TomlEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    example: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TomlEncoder<T> {
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

impl<T: Serialize> TomlEncoder<T> {
    /// Use a caller-supplied example instance in the instruction block
    /// instead of generated fake data
    pub fn with_example(mut self, example: &T) -> Result<Self, ExtractError> {
        self.example = Some(marshal_toml(example)?);
        Ok(self)
    }

    fn example_instance(&self) -> String {
        match &self.example {
            Some(example) => example.clone(),
            None => toml::to_string(&fake::instance(self.schema.root()))
                .unwrap_or_else(|_| self.schema.rendered().to_string()),
        }
    }
}

fn marshal_toml<T: Serialize>(value: &T) -> Result<String, ExtractError> {
    toml::to_string(value)
        .map_err(|e| ExtractError::serialization("TOML serialization failed", e))
}

impl<T> Encoder<T> for TomlEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        Some(format!(
            "\nPlease respond with TOML shaped like the following example:\n\
             ```toml\n{}```\n\
             Return an instance of the TOML, not a schema.\n",
            self.example_instance()
        ))
    }

    fn marshal(&self, value: &T) -> Result<String, ExtractError> {
        marshal_toml(value)
    }

    fn unmarshal(&self, raw: &str) -> Result<T, ExtractError> {
        let cleaned = cleanup_toml(raw);
        toml::from_str(cleaned).map_err(|e| ExtractError::decode(e.to_string(), raw))
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

/// `[[n]]` element index markers, e.g. `[[1]]`
fn is_index_marker(line: &str) -> bool {
    let inner = match line.strip_prefix("[[").and_then(|rest| rest.strip_suffix("]]")) {
        Some(inner) => inner,
        None => return false,
    };
    !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit())
}

/// Whether a line closes the current TOML block: a dash run, an index
/// marker, or a code fence. Blank lines are legal inside a TOML document
/// and stay part of the block.
fn is_element_delimiter(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.len() >= 2 && trimmed.bytes().all(|b| b == b'-'))
        || is_index_marker(trimmed)
        || trimmed.starts_with("```")
}

/// Segments a streamed sequence of TOML documents separated by explicit
/// `----` runs or `[[n]]` markers.
pub struct TomlStreamEncoder<T> {
    schema: Schema,
    validator: SchemaValidator,
    validate_enabled: bool,
    buffer: String,
    block: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TomlStreamEncoder<T> {
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

impl<T> TomlStreamEncoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn close_block(&mut self, out: &mut Vec<T>) {
        let cleaned = cleanup_toml(&self.block).to_string();
        self.block.clear();
        if cleaned.is_empty() {
            return;
        }
        if let Ok(value) = toml::from_str::<T>(&cleaned) {
            if !self.validate_enabled || self.validator.check(&value).is_ok() {
                out.push(value);
            }
        }
    }
}

impl<T> StreamEncoder<T> for TomlStreamEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        let mut examples = String::new();
        for i in 0..3 {
            if i > 0 {
                examples.push_str("\n----\n");
            }
            examples
                .push_str(&toml::to_string(&fake::instance(self.schema.root())).unwrap_or_default());
        }
        Some(format!(
            "\nPlease respond with a list of TOML documents shaped like the following examples, \
             with `----` on its own line between elements:\n\n{examples}\n\
             Return instances of the TOML, not a schema. Do not output anything else.\n"
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
            if is_element_delimiter(line) {
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
            if !is_element_delimiter(&leftover) {
                self.block.push_str(&leftover);
            }
        }
        self.close_block(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNamer;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Person {
        name: String,
        age: u32,
    }

    fn encoder() -> TomlEncoder<Person> {
        let schema = Schema::of::<Person>(&SchemaNamer::Short).unwrap();
        TomlEncoder::new(schema).unwrap()
    }

    fn stream_encoder() -> TomlStreamEncoder<Person> {
        let schema = Schema::of::<Person>(&SchemaNamer::Short).unwrap();
        TomlStreamEncoder::new(schema).unwrap()
    }

    #[test]
    fn cleanup_extracts_fenced_block() {
        let raw = "Of course:\n```toml\nname = \"Robby\"\nage = 22\n```\nDone.";
        assert_eq!(cleanup_toml(raw), "name = \"Robby\"\nage = 22");
    }

    #[test]
    fn unmarshal_round_trips_marshalled_output() {
        let enc = encoder();
        let original = Person {
            name: "Robby".into(),
            age: 22,
        };
        let rendered = enc.marshal(&original).unwrap();
        assert_eq!(enc.unmarshal(&rendered).unwrap(), original);
    }

    #[test]
    fn unmarshal_reports_decode_failure() {
        let enc = encoder();
        let err = enc.unmarshal("I cannot help with that.").unwrap_err();
        assert!(matches!(err, ExtractError::Decode { .. }));
    }

    #[test]
    fn index_markers_and_dash_runs_delimit() {
        assert!(is_element_delimiter("----"));
        assert!(is_element_delimiter("--"));
        assert!(is_element_delimiter("[[1]]"));
        assert!(is_element_delimiter("[[23]]"));
        assert!(is_element_delimiter("```toml"));
        assert!(!is_element_delimiter("[[table]]"));
        assert!(!is_element_delimiter("-"));
        assert!(!is_element_delimiter(""));
        assert!(!is_element_delimiter("name = \"x\""));
    }

    #[test]
    fn stream_splits_on_dash_runs() {
        let mut enc = stream_encoder();
        let mut out = Vec::new();
        out.extend(enc.push("name = \"Ada\"\nage = 36\n----\nname = \"Grace\"\n"));
        out.extend(enc.push("age = 45\n"));
        out.extend(enc.finish());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "Ada");
        assert_eq!(out[1].age, 45);
    }

    #[test]
    fn stream_splits_on_index_markers() {
        let mut enc = stream_encoder();
        let mut out = Vec::new();
        out.extend(enc.push("[[1]]\nname = \"Ada\"\nage = 36\n[[2]]\nname = \"Grace\"\nage = 45\n"));
        out.extend(enc.finish());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stream_drops_malformed_elements() {
        let mut enc = stream_encoder();
        let mut out = Vec::new();
        out.extend(enc.push("name = \"Ada\"\nage = 36\n----\nage = oops\n----\n"));
        out.extend(enc.push("name = \"Grace\"\nage = 45\n"));
        out.extend(enc.finish());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn blank_lines_stay_inside_a_block() {
        let mut enc = stream_encoder();
        let mut out = Vec::new();
        out.extend(enc.push("name = \"Ada\"\n\nage = 36\n"));
        out.extend(enc.finish());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].age, 36);
    }
}
