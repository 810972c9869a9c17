//! Domain types for waymark.
//!
//! This module contains the core data structures:
//! - Span: A persisted reference to a range of document text
//! - SpanUpdate: Partial changes pushed back to the store
//! - ViewMode / ViewPhase: Render policy and view lifecycle

pub mod span;
pub mod update;
pub mod view;

// Re-export commonly used types
pub use span::{DocumentKey, Span, SpanId, SpanKind};
pub use update::SpanUpdate;
pub use view::{ViewMode, ViewPhase};
