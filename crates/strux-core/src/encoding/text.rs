use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Encoder;
use crate::error::ExtractError;

/// Pass-through strategy for plain-text mode.
///
/// No schema guidance, no cleanup beyond whitespace trimming, and
/// validation is a no-op. The target type decodes from a bare string, so
/// `String` and string newtypes are the natural fits.
#[derive(Default)]
pub struct PlainTextEncoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PlainTextEncoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Encoder<T> for PlainTextEncoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn context(&self) -> Option<String> {
        None
    }

    fn marshal(&self, value: &T) -> Result<String, ExtractError> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    fn unmarshal(&self, raw: &str) -> Result<T, ExtractError> {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
            .map_err(|e| ExtractError::decode(e.to_string(), raw))
    }

    fn enable_validation(&mut self) {}

    fn validate(&self, _value: &T) -> Result<(), ExtractError> {
        Ok(())
    }
}
