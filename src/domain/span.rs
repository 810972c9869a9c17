//! Span types: the persisted reference to a range of document text.
//!
//! Offsets are measured in characters of the flattened document text
//! produced by [`crate::document::TextExtractor`]. The wire format accepts
//! the field names used by the annotation store (`start_char_index`,
//! `text_content`, `unit_type`, `broken_index`, ...) as aliases.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque span identifier, numeric or textual depending on the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpanId {
    Number(i64),
    Text(String),
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanId::Number(n) => write!(f, "{}", n),
            SpanId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SpanId {
    fn from(n: i64) -> Self {
        SpanId::Number(n)
    }
}

impl From<i32> for SpanId {
    fn from(n: i32) -> Self {
        SpanId::Number(n.into())
    }
}

impl From<&str> for SpanId {
    fn from(s: &str) -> Self {
        // Keep numeric-looking ids numeric so they compare equal to store ids
        match s.parse::<i64>() {
            Ok(n) => SpanId::Number(n),
            Err(_) => SpanId::Text(s.to_string()),
        }
    }
}

/// Content category of a span
///
/// The well-known kinds drive view-mode filtering; anything else the
/// authoring UI invents is carried through as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SpanKind {
    UserHighlight,
    CanonicalAnswer,
    LinkSubject,
    LinkObject,
    Custom(String),
}

impl SpanKind {
    pub fn as_str(&self) -> &str {
        match self {
            SpanKind::UserHighlight => "user_highlight",
            SpanKind::CanonicalAnswer => "canonical_answer",
            SpanKind::LinkSubject => "link_subject",
            SpanKind::LinkObject => "link_object",
            SpanKind::Custom(s) => s,
        }
    }

    /// Visual class attached to rendered markers
    pub fn css_class(&self) -> String {
        let name = self.as_str();
        if name.is_empty() {
            "kind-default".to_string()
        } else {
            format!("kind-{}", name)
        }
    }
}

impl From<String> for SpanKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user_highlight" => SpanKind::UserHighlight,
            "canonical_answer" => SpanKind::CanonicalAnswer,
            "link_subject" => SpanKind::LinkSubject,
            "link_object" => SpanKind::LinkObject,
            _ => SpanKind::Custom(s),
        }
    }
}

impl From<SpanKind> for String {
    fn from(kind: SpanKind) -> Self {
        kind.as_str().to_string()
    }
}

impl Default for SpanKind {
    fn default() -> Self {
        SpanKind::Custom(String::new())
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted text span
///
/// Offsets are signed on the wire: stores occasionally hand back negative
/// values, which must resolve to "not found" rather than fail to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,

    /// First character of the span in the flattened text
    #[serde(alias = "start_char_index")]
    pub start_offset: i64,

    /// One past the last character of the span
    #[serde(alias = "end_char_index")]
    pub end_offset: i64,

    /// Text the span covered when it was last known to be correct
    #[serde(alias = "text_content")]
    pub snapshot_text: String,

    #[serde(alias = "unit_type", default)]
    pub kind: SpanKind,

    /// Set once healing gave up; excluded from rendering and auto-healing
    #[serde(
        alias = "broken_index",
        default,
        deserialize_with = "deserialize_flag"
    )]
    pub broken: bool,
}

impl Span {
    /// Create a span whose offsets were just computed from the document
    pub fn new(
        id: impl Into<SpanId>,
        start_offset: i64,
        end_offset: i64,
        snapshot_text: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        Self {
            id: id.into(),
            start_offset,
            end_offset,
            snapshot_text: snapshot_text.into(),
            kind,
            broken: false,
        }
    }

    /// Mark as broken (builder style, mostly for tests)
    pub fn with_broken(mut self, broken: bool) -> Self {
        self.broken = broken;
        self
    }

    /// Length of the snapshot in characters
    pub fn snapshot_len(&self) -> usize {
        self.snapshot_text.chars().count()
    }
}

/// Accept `true`/`false`, `0`/`1` and `null` for the broken flag
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        None => false,
    })
}

/// Key identifying one document in the external store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Source profile code (e.g. "bw")
    pub source_code: String,
    /// Page identifier within the source
    pub page_id: u64,
}

impl DocumentKey {
    pub fn new(source_code: impl Into<String>, page_id: u64) -> Self {
        Self {
            source_code: source_code.into(),
            page_id,
        }
    }

    /// A key is usable only with a known source and a non-zero page id
    pub fn is_complete(&self) -> bool {
        self.page_id != 0 && !self.source_code.is_empty() && self.source_code != "unknown"
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_code, self.page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_field_aliases() {
        let json = r#"{
            "id": 42,
            "start_char_index": 10,
            "end_char_index": 20,
            "text_content": "some words",
            "unit_type": "canonical_answer",
            "broken_index": 1
        }"#;

        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.id, SpanId::Number(42));
        assert_eq!(span.start_offset, 10);
        assert_eq!(span.end_offset, 20);
        assert_eq!(span.snapshot_text, "some words");
        assert_eq!(span.kind, SpanKind::CanonicalAnswer);
        assert!(span.broken);
    }

    #[test]
    fn test_native_field_names() {
        let json = r#"{
            "id": "abc",
            "start_offset": -3,
            "end_offset": 5,
            "snapshot_text": "x",
            "kind": "prayer",
            "broken": null
        }"#;

        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.id, SpanId::Text("abc".to_string()));
        assert_eq!(span.start_offset, -3);
        assert_eq!(span.kind, SpanKind::Custom("prayer".to_string()));
        assert!(!span.broken);
    }

    #[test]
    fn test_kind_round_trips_as_string() {
        let json = serde_json::to_string(&SpanKind::LinkSubject).unwrap();
        assert_eq!(json, "\"link_subject\"");
        assert_eq!(SpanKind::Custom(String::new()).css_class(), "kind-default");
        assert_eq!(SpanKind::UserHighlight.css_class(), "kind-user_highlight");
    }

    #[test]
    fn test_span_id_from_str() {
        assert_eq!(SpanId::from("17"), SpanId::Number(17));
        assert_eq!(SpanId::from("a-17"), SpanId::Text("a-17".to_string()));
    }

    #[test]
    fn test_document_key_completeness() {
        assert!(DocumentKey::new("bw", 12).is_complete());
        assert!(!DocumentKey::new("bw", 0).is_complete());
        assert!(!DocumentKey::new("unknown", 12).is_complete());
    }
}
