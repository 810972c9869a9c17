//! waymark - Offset verification and healing for annotation spans
//!
//! Annotations on third-party documents are stored as
//! `(start_offset, end_offset, snapshot_text)` spans. Documents change
//! between visits, so stored offsets drift. waymark checks every span
//! against the current document, relocates drifted spans by their head
//! and tail content anchors, reports the repairs back to the store in one
//! batch, and renders the surviving spans as markers.
//!
//! # Architecture
//!
//! All offsets live in one coordinate space: the flattened visible text
//! of the document's content boundary. The document adapter produces that
//! text plus the ordered leaf partition; the mapper turns offsets back
//! into leaf positions; the renderer wraps those positions in markers.
//!
//! # Modules
//!
//! - `adapters`: Span stores (HTTP, file, in-memory)
//! - `core`: Reconciliation driver, reveal retries, view session loop
//! - `document`: Markup tree, text extraction, offset mapping, rendering
//! - `domain`: Data structures (Span, SpanUpdate, DocumentKey, ViewMode)
//! - `healing`: Span verification and anchor healing
//! - `page`: Source profiles, page metadata and page guard
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Heal and render the spans of a saved page
//! waymark reconcile page.html --url https://bahai.works/Some_Page -o marked.html
//!
//! # Dry run with a verdict per span
//! waymark verify page.html --source bw --page 4321
//!
//! # Inspect the coordinate space
//! waymark extract page.html --leaves
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod document;
pub mod domain;
pub mod healing;
pub mod page;

// Re-export main types at crate root for convenience
pub use adapters::{FileSpanStore, HttpSpanStore, MemorySpanStore, SpanStore, StoreError};
pub use core::{PassReport, Reconciler, ViewCommand, ViewEvent, ViewSession};
pub use document::{parse_markup, Document, Extraction, TextExtractor};
pub use domain::{DocumentKey, Span, SpanId, SpanKind, SpanUpdate, ViewMode, ViewPhase};
pub use healing::{heal, verify, HealOutcome, HealingSettings, Verdict};
pub use page::{PageMetadata, SourceProfile};
