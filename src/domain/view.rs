//! View-level state: which spans are shown and where the view is in its
//! reconciliation lifecycle.

use serde::{Deserialize, Serialize};

use super::span::{Span, SpanKind};

/// Render filter policy selected by the authoring UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Personal highlights only
    #[default]
    Taxonomy,
    /// Everything that is not a highlight, answer or relation endpoint
    Create,
    /// Canonical answers only
    Qa,
    /// Relation subjects and objects
    Relations,
    /// Every healthy span
    All,
}

impl ViewMode {
    /// Whether a span is rendered in this mode (broken spans never are)
    pub fn shows(&self, span: &Span) -> bool {
        if span.broken {
            return false;
        }

        match self {
            ViewMode::Taxonomy => span.kind == SpanKind::UserHighlight,
            ViewMode::Create => matches!(span.kind, SpanKind::Custom(_)),
            ViewMode::Qa => span.kind == SpanKind::CanonicalAnswer,
            ViewMode::Relations => {
                matches!(span.kind, SpanKind::LinkSubject | SpanKind::LinkObject)
            }
            ViewMode::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Taxonomy => "taxonomy",
            ViewMode::Create => "create",
            ViewMode::Qa => "qa",
            ViewMode::Relations => "relations",
            ViewMode::All => "all",
        }
    }
}

/// Lifecycle phase of one document view
///
/// `Loading → Verifying → (Healing)? → Rendering → Idle`, re-entering
/// `Verifying` on span-set updates and `Rendering` on display requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewPhase {
    /// Page is not eligible for annotation (guarded or missing key)
    Hibernating,
    Loading,
    Verifying,
    Healing,
    Rendering,
    Idle,
}

impl ViewPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewPhase::Hibernating => "hibernating",
            ViewPhase::Loading => "loading",
            ViewPhase::Verifying => "verifying",
            ViewPhase::Healing => "healing",
            ViewPhase::Rendering => "rendering",
            ViewPhase::Idle => "idle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(kind: SpanKind) -> Span {
        Span::new(1, 0, 4, "text", kind)
    }

    #[test]
    fn test_mode_filters() {
        assert!(ViewMode::Taxonomy.shows(&span(SpanKind::UserHighlight)));
        assert!(!ViewMode::Taxonomy.shows(&span(SpanKind::CanonicalAnswer)));

        assert!(ViewMode::Create.shows(&span(SpanKind::Custom("prayer".into()))));
        assert!(!ViewMode::Create.shows(&span(SpanKind::UserHighlight)));
        assert!(!ViewMode::Create.shows(&span(SpanKind::LinkObject)));

        assert!(ViewMode::Qa.shows(&span(SpanKind::CanonicalAnswer)));
        assert!(ViewMode::Relations.shows(&span(SpanKind::LinkSubject)));
        assert!(ViewMode::Relations.shows(&span(SpanKind::LinkObject)));
        assert!(!ViewMode::Relations.shows(&span(SpanKind::UserHighlight)));
    }

    #[test]
    fn test_broken_never_shown() {
        let broken = span(SpanKind::UserHighlight).with_broken(true);
        assert!(!ViewMode::Taxonomy.shows(&broken));
        assert!(!ViewMode::All.shows(&broken));
    }
}
