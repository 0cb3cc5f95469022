use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Invocation mode: how schema guidance reaches the provider and where the
/// structured payload comes back.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Schema declared as a provider-native tool; payload in the tool-call
    /// arguments
    ToolCall,
    /// Tool-call mode with strict argument schema enforcement where supported
    ToolCallStrict,
    /// Schema appended as prompt text; provider asked for a JSON object
    Json,
    /// Server-side JSON-schema response format with strict enforcement
    JsonStrict,
    /// Server-side JSON-schema response format
    JsonSchema,
    /// Schema appended as prompt text with a faked YAML example
    Yaml,
    /// Schema appended as prompt text with a faked TOML example
    Toml,
    /// Schema context only; payload is the raw text
    PlainText,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::JsonSchema
    }
}

/// How schema guidance is attached to the outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaGuidance {
    /// Declare the schema's functions as provider-native tools
    Tools { strict: bool },
    /// Ask the provider to enforce the schema server-side
    ResponseFormat { strict: bool },
    /// Append the encoder's instruction block to a system/user message
    Prompt,
}

/// Where the structured payload is located in the inbound response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// The argument blob(s) of the returned tool call(s)
    ToolCalls,
    /// The primary text content
    Text,
}

/// The wire format the payload is decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Yaml,
    Toml,
    Text,
}

/// One record per mode: shaping strategy plus payload location, looked up
/// once per call instead of re-dispatched through nested conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePlan {
    pub guidance: SchemaGuidance,
    pub payload: PayloadSource,
    pub wire: WireFormat,
}

impl Mode {
    pub fn plan(self) -> ModePlan {
        match self {
            Mode::ToolCall => ModePlan {
                guidance: SchemaGuidance::Tools { strict: false },
                payload: PayloadSource::ToolCalls,
                wire: WireFormat::Json,
            },
            Mode::ToolCallStrict => ModePlan {
                guidance: SchemaGuidance::Tools { strict: true },
                payload: PayloadSource::ToolCalls,
                wire: WireFormat::Json,
            },
            Mode::Json => ModePlan {
                guidance: SchemaGuidance::Prompt,
                payload: PayloadSource::Text,
                wire: WireFormat::Json,
            },
            Mode::JsonStrict => ModePlan {
                guidance: SchemaGuidance::ResponseFormat { strict: true },
                payload: PayloadSource::Text,
                wire: WireFormat::Json,
            },
            Mode::JsonSchema => ModePlan {
                guidance: SchemaGuidance::ResponseFormat { strict: false },
                payload: PayloadSource::Text,
                wire: WireFormat::Json,
            },
            Mode::Yaml => ModePlan {
                guidance: SchemaGuidance::Prompt,
                payload: PayloadSource::Text,
                wire: WireFormat::Yaml,
            },
            Mode::Toml => ModePlan {
                guidance: SchemaGuidance::Prompt,
                payload: PayloadSource::Text,
                wire: WireFormat::Toml,
            },
            Mode::PlainText => ModePlan {
                guidance: SchemaGuidance::Prompt,
                payload: PayloadSource::Text,
                wire: WireFormat::Text,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn display_and_parse_round_trip() {
        for mode in Mode::iter() {
            let rendered = mode.to_string();
            assert_eq!(Mode::from_str(&rendered).unwrap(), mode);
        }
        assert_eq!(Mode::ToolCall.to_string(), "tool_call");
        assert_eq!(Mode::from_str("json_schema").unwrap(), Mode::JsonSchema);
    }

    #[test]
    fn tool_modes_read_payload_from_tool_calls() {
        assert_eq!(Mode::ToolCall.plan().payload, PayloadSource::ToolCalls);
        assert_eq!(Mode::ToolCallStrict.plan().payload, PayloadSource::ToolCalls);
        for mode in [Mode::Json, Mode::JsonStrict, Mode::JsonSchema, Mode::Yaml, Mode::Toml] {
            assert_eq!(mode.plan().payload, PayloadSource::Text);
        }
    }

    #[test]
    fn strictness_follows_the_mode() {
        assert_eq!(
            Mode::ToolCallStrict.plan().guidance,
            SchemaGuidance::Tools { strict: true }
        );
        assert_eq!(
            Mode::JsonStrict.plan().guidance,
            SchemaGuidance::ResponseFormat { strict: true }
        );
        assert_eq!(
            Mode::JsonSchema.plan().guidance,
            SchemaGuidance::ResponseFormat { strict: false }
        );
    }

    #[test]
    fn wire_format_matches_the_encoder_family() {
        assert_eq!(Mode::Yaml.plan().wire, WireFormat::Yaml);
        assert_eq!(Mode::Toml.plan().wire, WireFormat::Toml);
        assert_eq!(Mode::PlainText.plan().wire, WireFormat::Text);
        assert_eq!(Mode::ToolCall.plan().wire, WireFormat::Json);
    }

    #[test]
    fn default_mode_is_json_schema() {
        assert_eq!(Mode::default(), Mode::JsonSchema);
    }
}
