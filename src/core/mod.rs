//! Core orchestration logic.
//!
//! This module contains:
//! - Reconciler: Per-view span cache, verify/heal/persist passes, rendering
//! - RevealTask: Bounded scroll-into-view retries
//! - ViewSession: Command loop coalescing triggers for one view

pub mod reconciler;
pub mod reveal;
pub mod session;

// Re-export commonly used types
pub use reconciler::{PassReport, Reconciler, SpanOutcome, SpanStatus};
pub use reveal::RevealTask;
pub use session::{SessionChannels, ViewCommand, ViewEvent, ViewSession};
