//! Span verification: does a persisted span still cover its text?

use serde::Serialize;

use crate::document::{resolve, Extraction, ResolutionError};
use crate::domain::Span;

/// How a healthy span matched its snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Byte-for-byte equal
    Exact,
    /// Equal after collapsing whitespace runs and trimming
    Normalized,
}

/// Why a span is broken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenReason {
    /// Offsets do not map onto the document
    Unresolved(ResolutionError),
    /// Offsets map, but the text there differs from the snapshot
    TextMismatch { found: String },
}

/// Result of verifying one span
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy(MatchKind),
    Broken(BrokenReason),
    /// Already flagged broken; never re-verified automatically
    Skipped,
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy(_))
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, Verdict::Broken(_))
    }
}

/// Decide whether `span` is HEALTHY or BROKEN against the current document
pub fn verify(span: &Span, extraction: &Extraction) -> Verdict {
    if span.broken {
        return Verdict::Skipped;
    }

    let range = match resolve(span.start_offset, span.end_offset, &extraction.leaves) {
        Ok(range) => range,
        Err(e) => return Verdict::Broken(BrokenReason::Unresolved(e)),
    };

    let current = range.covered_text(&extraction.leaves, &extraction.flat);
    if current == span.snapshot_text {
        return Verdict::Healthy(MatchKind::Exact);
    }

    if normalize_whitespace(&current) == normalize_whitespace(&span.snapshot_text) {
        return Verdict::Healthy(MatchKind::Normalized);
    }

    Verdict::Broken(BrokenReason::TextMismatch { found: current })
}

/// Normalize whitespace: collapse runs of whitespace to single space, trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
