//! Offset verification and healing.
//!
//! - `verify`: Decide HEALTHY / BROKEN for a persisted span
//! - `anchor`: Relocate a BROKEN span using head/tail content anchors

pub mod anchor;
pub mod verify;

pub use anchor::{
    heal, Anchors, HealOutcome, HealingSettings, Repair, SearchScope, Unrecoverable,
    DEFAULT_ANCHOR_LEN, DEFAULT_SEARCH_RADIUS,
};
pub use verify::{normalize_whitespace, verify, BrokenReason, MatchKind, Verdict};
