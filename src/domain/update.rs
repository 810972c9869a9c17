//! Partial span updates sent back to the external store.

use serde::{Deserialize, Serialize};

use super::span::{Span, SpanId};

/// Partial-field update, applied by identifier
///
/// Only the fields that changed during reconciliation are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanUpdate {
    pub id: SpanId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken: Option<bool>,
}

impl SpanUpdate {
    /// Update carrying healed offsets (and the repaired text, if any)
    pub fn healed(id: SpanId, start: i64, end: i64, snapshot_text: Option<String>) -> Self {
        Self {
            id,
            start_offset: Some(start),
            end_offset: Some(end),
            snapshot_text,
            broken: None,
        }
    }

    /// Update flagging a span as unrecoverable
    pub fn broken(id: SpanId) -> Self {
        Self {
            id,
            start_offset: None,
            end_offset: None,
            snapshot_text: None,
            broken: Some(true),
        }
    }

    /// Apply this update to a span with the same id
    pub fn apply_to(&self, span: &mut Span) {
        if let Some(start) = self.start_offset {
            span.start_offset = start;
        }
        if let Some(end) = self.end_offset {
            span.end_offset = end;
        }
        if let Some(ref text) = self.snapshot_text {
            span.snapshot_text = text.clone();
        }
        if let Some(broken) = self.broken {
            span.broken = broken;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpanKind;

    #[test]
    fn test_broken_update_serializes_only_flag() {
        let update = SpanUpdate::broken(SpanId::Number(7));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"id": 7, "broken": true}));
    }

    #[test]
    fn test_apply_healed_update() {
        let mut span = Span::new(1, 0, 5, "hello", SpanKind::UserHighlight);
        SpanUpdate::healed(SpanId::Number(1), 10, 16, Some("hello!".to_string()))
            .apply_to(&mut span);

        assert_eq!(span.start_offset, 10);
        assert_eq!(span.end_offset, 16);
        assert_eq!(span.snapshot_text, "hello!");
        assert!(!span.broken);
    }
}
