//! Structured-document adapter.
//!
//! The healing engine sees a document as an ordered sequence of text
//! leaves. This module supplies that view for markup documents:
//! - `tree`: Arena-backed element/text/marker tree
//! - `parse`: Lenient (X)HTML reader
//! - `extract`: Flattened text and leaf partition (the coordinate space)
//! - `mapper`: Offsets back to leaves
//! - `render`: Marker insertion and removal

pub mod extract;
pub mod mapper;
pub mod parse;
pub mod render;
pub mod tree;

pub use extract::{
    ContentBoundary, Extraction, ExtractionRules, FlatText, Leaf, LeafIndex, TextExtractor,
    DEFAULT_HIDDEN_TAGS,
};
pub use mapper::{resolve, Fragment, LeafPoint, ResolutionError, ResolvedRange};
pub use parse::{parse_markup, ParseError};
pub use render::{RenderError, RenderReport, SpanRenderer};
pub use tree::{Document, Element, Marker, NodeId, NodeKind};
