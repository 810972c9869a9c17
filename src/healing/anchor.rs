//! Anchor-based healing of broken spans.
//!
//! A broken span is relocated by searching the flattened text for the
//! first and last `anchor_len` characters of its snapshot: head anchor at
//! its earliest match, tail anchor at its latest match. The search runs in
//! a window around the span's last known position first and falls back to
//! the whole document when either anchor is missing there.
//!
//! A candidate is accepted only if its length stays within
//! `max(min_length_slack, length_tolerance * snapshot_len)` of the
//! snapshot. That check is the only guard against anchor collisions.
//!
//! Snapshots no longer than one anchor are searched as a single needle, so
//! head and tail can never land on two separate copies of a short phrase.

use serde::{Deserialize, Serialize};

use crate::document::FlatText;
use crate::domain::Span;

pub const DEFAULT_ANCHOR_LEN: usize = 50;
pub const DEFAULT_SEARCH_RADIUS: usize = 2000;
pub const DEFAULT_LENGTH_TOLERANCE: f64 = 0.2;
pub const DEFAULT_MIN_LENGTH_SLACK: usize = 50;

/// Tunables for the healer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingSettings {
    /// Anchor size in characters (default: 50)
    #[serde(default = "default_anchor_len")]
    pub anchor_len: usize,

    /// Neighborhood radius around the last known start (default: 2000)
    #[serde(default = "default_search_radius")]
    pub search_radius: usize,

    /// Allowed relative length drift (default: 0.2)
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: f64,

    /// Allowed absolute length drift floor (default: 50)
    #[serde(default = "default_min_length_slack")]
    pub min_length_slack: usize,

    /// Replace the stored snapshot with the text found at the new offsets
    #[serde(default = "default_persist_repaired_text")]
    pub persist_repaired_text: bool,
}

fn default_anchor_len() -> usize {
    DEFAULT_ANCHOR_LEN
}
fn default_search_radius() -> usize {
    DEFAULT_SEARCH_RADIUS
}
fn default_length_tolerance() -> f64 {
    DEFAULT_LENGTH_TOLERANCE
}
fn default_min_length_slack() -> usize {
    DEFAULT_MIN_LENGTH_SLACK
}
fn default_persist_repaired_text() -> bool {
    true
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            anchor_len: default_anchor_len(),
            search_radius: default_search_radius(),
            length_tolerance: default_length_tolerance(),
            min_length_slack: default_min_length_slack(),
            persist_repaired_text: default_persist_repaired_text(),
        }
    }
}

impl HealingSettings {
    /// Same settings with a different relative tolerance
    pub fn with_tolerance(mut self, length_tolerance: f64) -> Self {
        self.length_tolerance = length_tolerance;
        self
    }

    /// Whether a candidate length is plausible for a snapshot length
    pub fn accepts_length(&self, candidate: usize, snapshot: usize) -> bool {
        let drift = (candidate as f64 - snapshot as f64).abs();
        let allowed = (self.min_length_slack as f64).max(self.length_tolerance * snapshot as f64);
        drift < allowed
    }
}

/// Where the accepted match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Neighborhood,
    Document,
}

/// Relocated span
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repair {
    pub start: usize,
    pub end: usize,
    /// Literal text at the new offsets (the new snapshot)
    pub repaired_text: String,
    pub scope: SearchScope,
}

/// Why healing gave up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unrecoverable {
    EmptySnapshot,
    /// An anchor occurs nowhere in the document
    AnchorNotFound,
    /// Tail match ends at or before the head match
    InvertedMatch { start: usize, end: usize },
    /// Candidate length implausible for the snapshot
    LengthMismatch { candidate: usize, expected: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    Healed(Repair),
    Unrecoverable(Unrecoverable),
}

/// Head and tail anchors of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors<'a> {
    pub head: &'a str,
    pub tail: &'a str,
    /// Character length of the tail anchor
    pub tail_len: usize,
}

impl<'a> Anchors<'a> {
    /// First and last `n` characters; the whole snapshot when shorter
    pub fn of(snapshot: &'a str, n: usize) -> Self {
        let len = snapshot.chars().count();
        let head = match snapshot.char_indices().nth(n) {
            Some((byte, _)) => &snapshot[..byte],
            None => snapshot,
        };
        let tail = match snapshot.char_indices().nth(len.saturating_sub(n)) {
            Some((byte, _)) => &snapshot[byte..],
            None => snapshot,
        };
        Self {
            head,
            tail,
            tail_len: len.min(n),
        }
    }
}

/// Try to relocate `span` inside the flattened text
pub fn heal(span: &Span, flat: &FlatText, settings: &HealingSettings) -> HealOutcome {
    let snapshot = span.snapshot_text.as_str();
    let snapshot_len = span.snapshot_len();
    if snapshot_len == 0 {
        return HealOutcome::Unrecoverable(Unrecoverable::EmptySnapshot);
    }

    let total = flat.char_len();
    let origin = usize::try_from(span.start_offset.max(0))
        .unwrap_or(0)
        .min(total);
    let neighborhood = origin.saturating_sub(settings.search_radius)
        ..(origin + snapshot_len + settings.search_radius).min(total);
    let scopes = [
        (SearchScope::Neighborhood, neighborhood),
        (SearchScope::Document, 0..total),
    ];

    let located = if snapshot_len <= settings.anchor_len {
        scopes.iter().find_map(|(scope, window)| {
            flat.find(snapshot, window.clone())
                .map(|start| (*scope, start, start + snapshot_len))
        })
    } else {
        let anchors = Anchors::of(snapshot, settings.anchor_len);
        scopes.iter().find_map(|(scope, window)| {
            let head = flat.find(anchors.head, window.clone())?;
            let tail = flat.rfind(anchors.tail, window.clone())?;
            Some((*scope, head, tail + anchors.tail_len))
        })
    };

    let Some((scope, start, end)) = located else {
        return HealOutcome::Unrecoverable(Unrecoverable::AnchorNotFound);
    };

    if end <= start {
        return HealOutcome::Unrecoverable(Unrecoverable::InvertedMatch { start, end });
    }

    let candidate = end - start;
    if !settings.accepts_length(candidate, snapshot_len) {
        return HealOutcome::Unrecoverable(Unrecoverable::LengthMismatch {
            candidate,
            expected: snapshot_len,
        });
    }

    match flat.slice(start..end) {
        Some(text) => HealOutcome::Healed(Repair {
            start,
            end,
            repaired_text: text.to_string(),
            scope,
        }),
        None => HealOutcome::Unrecoverable(Unrecoverable::AnchorNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpanKind;

    fn flat(text: &str) -> FlatText {
        FlatText::new(text.to_string())
    }

    #[test]
    fn test_anchors_of_long_and_short_snapshots() {
        let anchors = Anchors::of("abcdefgh", 3);
        assert_eq!(anchors.head, "abc");
        assert_eq!(anchors.tail, "fgh");
        assert_eq!(anchors.tail_len, 3);

        let short = Anchors::of("ab", 3);
        assert_eq!(short.head, "ab");
        assert_eq!(short.tail, "ab");
        assert_eq!(short.tail_len, 2);

        let multibyte = Anchors::of("ééééé", 2);
        assert_eq!(multibyte.head, "éé");
        assert_eq!(multibyte.tail, "éé");
    }

    #[test]
    fn test_length_tolerance() {
        let settings = HealingSettings::default();
        // Floor of 50 dominates for short snapshots
        assert!(settings.accepts_length(149, 100));
        assert!(!settings.accepts_length(150, 100));
        // 20% dominates for long ones
        assert!(settings.accepts_length(1150, 1000));
        assert!(!settings.accepts_length(1250, 1000));
        assert!(settings.clone().with_tolerance(0.3).accepts_length(1250, 1000));
    }

    #[test]
    fn test_short_snapshot_heals_to_a_single_copy() {
        // Two copies of a short phrase within a few characters of each other
        let text = flat("..... foo bar ..... foo bar .....");
        let span = Span::new(1, 0, 7, "foo bar", SpanKind::UserHighlight);

        match heal(&span, &text, &HealingSettings::default()) {
            HealOutcome::Healed(repair) => {
                assert_eq!((repair.start, repair.end), (6, 13));
                assert_eq!(repair.repaired_text, "foo bar");
                assert_eq!(repair.scope, SearchScope::Neighborhood);
            }
            other => panic!("expected healed, got {:?}", other),
        }
    }

    #[test]
    fn test_falls_back_to_whole_document() {
        let settings = HealingSettings {
            search_radius: 10,
            ..Default::default()
        };
        let text = format!("{}target phrase{}", "-".repeat(500), "-".repeat(20));
        let span = Span::new(1, 2, 15, "target phrase", SpanKind::UserHighlight);

        match heal(&span, &flat(&text), &settings) {
            HealOutcome::Healed(repair) => {
                assert_eq!(repair.start, 500);
                assert_eq!(repair.scope, SearchScope::Document);
            }
            other => panic!("expected healed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_anchor_is_unrecoverable() {
        let span = Span::new(1, 0, 6, "absent", SpanKind::UserHighlight);
        assert_eq!(
            heal(&span, &flat("nothing to see here"), &HealingSettings::default()),
            HealOutcome::Unrecoverable(Unrecoverable::AnchorNotFound)
        );

        let empty = Span::new(2, 0, 0, "", SpanKind::UserHighlight);
        assert_eq!(
            heal(&empty, &flat("text"), &HealingSettings::default()),
            HealOutcome::Unrecoverable(Unrecoverable::EmptySnapshot)
        );
    }

    #[test]
    fn test_tail_before_head_is_rejected() {
        let settings = HealingSettings {
            anchor_len: 4,
            ..Default::default()
        };
        // Tail "WXYZ" only occurs before head "ABCD"
        let span = Span::new(1, 0, 12, "ABCD1234WXYZ", SpanKind::UserHighlight);
        assert!(matches!(
            heal(&span, &flat("WXYZ 1234 ABCD"), &settings),
            HealOutcome::Unrecoverable(Unrecoverable::InvertedMatch { .. })
        ));
    }
}
