//! Opaque message payloads.

use serde::{Deserialize, Serialize};

/// The body carried by a mediation context.
///
/// Either a structured JSON tree or a raw byte sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Payload {
    /// No body.
    #[default]
    Empty,
    /// A structured tree.
    Json(serde_json::Value),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Payload {
    /// Creates a JSON payload.
    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    /// Creates a text payload stored as UTF-8 bytes.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Bytes(text.into().into_bytes())
    }

    /// Returns the structured tree, if this is a JSON payload.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the string form used by pattern matching.
    ///
    /// JSON strings yield their contents, other JSON values their compact
    /// serialization; bytes must be valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Json(serde_json::Value::String(s)) => Some(s.clone()),
            Self::Json(value) => Some(value.to_string()),
            Self::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
        }
    }

    /// Returns true if there is no body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the size of the body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Json(value) => value.to_string().len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_forms() {
        assert_eq!(Payload::text("hello").as_text().as_deref(), Some("hello"));
        assert_eq!(Payload::json(json!("quoted")).as_text().as_deref(), Some("quoted"));
        assert_eq!(Payload::json(json!({"a": 1})).as_text().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(Payload::Empty.as_text(), None);
        assert_eq!(Payload::Bytes(vec![0xff, 0xfe]).as_text(), None);
    }

    #[test]
    fn test_len_and_empty() {
        assert!(Payload::default().is_empty());
        assert_eq!(Payload::text("abc").len(), 3);
        assert!(!Payload::json(json!(null)).is_empty());
    }
}
