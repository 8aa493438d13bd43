//! # Payload Serialization
//!
//! Converts application datagrams to and from the text carried in a frame
//! body. The conversion is split in two so providers stay object safe:
//! `serde` turns the concrete type into a [`serde_json::Value`], and the
//! provider decides how that value is written as text.
//!
//! ## Providers
//! - **JsonSerialization** (default): compact JSON via `serde_json`
//! - Custom providers implement [`SerializationProvider`] and are installed
//!   on a messenger or on a single context
//!
//! Raw byte payloads never pass through a provider.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Text codec for datagram payloads.
pub trait SerializationProvider: Send + Sync {
    /// Write a structured value as text.
    fn serialize_to_text(&self, value: &Value) -> Result<String>;

    /// Parse text produced by [`serialize_to_text`](Self::serialize_to_text).
    fn deserialize_from_text(&self, text: &str) -> Result<Value>;
}

/// Default provider: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerialization;

impl SerializationProvider for JsonSerialization {
    fn serialize_to_text(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
    }

    fn deserialize_from_text(&self, text: &str) -> Result<Value> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

/// Serialize `value` to text through `provider`.
pub fn to_text<T: Serialize>(provider: &dyn SerializationProvider, value: &T) -> Result<String> {
    let value =
        serde_json::to_value(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    provider.serialize_to_text(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
        tags: Vec<String>,
    }

    /// Wraps JSON in a marker so tests can tell which provider ran.
    struct Bracketed;

    impl SerializationProvider for Bracketed {
        fn serialize_to_text(&self, value: &Value) -> Result<String> {
            Ok(format!("<{}>", JsonSerialization.serialize_to_text(value)?))
        }

        fn deserialize_from_text(&self, text: &str) -> Result<Value> {
            let inner = text
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .ok_or_else(|| ProtocolError::DeserializeError("missing brackets".into()))?;
            JsonSerialization.deserialize_from_text(inner)
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_json_roundtrip() {
        let reading = Reading {
            sensor: "thermo-1".into(),
            value: 21.5,
            tags: vec!["lab".into()],
        };

        let text = to_text(&JsonSerialization, &reading).expect("serialize");
        let value = JsonSerialization
            .deserialize_from_text(&text)
            .expect("deserialize");
        let recovered: Reading = serde_json::from_value(value).expect("typed");
        assert_eq!(recovered, reading);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_custom_provider_is_used() {
        let text = to_text(&Bracketed, &42u32).expect("serialize");
        assert_eq!(text, "<42>");
        let value = Bracketed.deserialize_from_text(&text).expect("deserialize");
        assert_eq!(value, Value::from(42));
    }

    #[test]
    fn test_invalid_text_rejected() {
        let result = JsonSerialization.deserialize_from_text("{not json");
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
    }
}
