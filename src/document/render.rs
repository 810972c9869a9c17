//! Span rendering: wraps the leaves covered by a span in markers.
//!
//! Every render starts from the unmarked document, so rendering the same
//! span set twice yields the same marker structure as rendering it once.
//! Each span is resolved against a fresh leaf index: markers never add
//! text, so the flattened coordinates are stable while the leaf
//! partitioning changes as earlier spans split leaves.

use thiserror::Error;
use tracing::debug;

use crate::domain::{Span, SpanId};

use super::extract::{LeafIndex, TextExtractor};
use super::mapper::{resolve, Fragment, ResolutionError, ResolvedRange};
use super::tree::{Document, Marker, NodeId};

/// Failure to render one span; never aborts sibling spans
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Span {span_id} could not be resolved: {source}")]
    Unresolved {
        span_id: SpanId,
        #[source]
        source: ResolutionError,
    },

    #[error("Leaf {node:?} no longer matches the resolved range")]
    StaleLeaf { node: NodeId },
}

/// Outcome of rendering a span set
#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    /// Markers removed before rendering
    pub cleared: usize,
    /// Spans that produced at least one marker
    pub rendered: Vec<SpanId>,
    /// Total marker fragments inserted
    pub fragments: usize,
    pub failed: Vec<(SpanId, RenderError)>,
}

/// Renders spans as markers inside a document
#[derive(Debug, Clone, Default)]
pub struct SpanRenderer {
    extractor: TextExtractor,
}

impl SpanRenderer {
    pub fn new(extractor: TextExtractor) -> Self {
        Self { extractor }
    }

    /// Remove every marker and restore the unmarked document
    pub fn clear(&self, doc: &mut Document) -> usize {
        doc.clear_markers()
    }

    /// Clear, then render each span independently
    pub fn render_all<'a>(
        &self,
        doc: &mut Document,
        spans: impl IntoIterator<Item = &'a Span>,
    ) -> RenderReport {
        let mut report = RenderReport {
            cleared: self.clear(doc),
            ..Default::default()
        };

        for span in spans {
            match self.render_span(doc, span) {
                Ok(0) => {}
                Ok(n) => {
                    report.fragments += n;
                    report.rendered.push(span.id.clone());
                }
                Err(e) => {
                    debug!(span_id = %span.id, error = %e, "Skipping span");
                    report.failed.push((span.id.clone(), e));
                }
            }
        }

        report
    }

    /// Resolve a span against the current leaves and wrap it
    pub fn render_span(&self, doc: &mut Document, span: &Span) -> Result<usize, RenderError> {
        let index = self.extractor.leaf_index(doc);
        let range = resolve(span.start_offset, span.end_offset, &index).map_err(|source| {
            RenderError::Unresolved {
                span_id: span.id.clone(),
                source,
            }
        })?;
        self.render_range(doc, &range, &index, span)
    }

    /// Wrap an already resolved range; returns the number of markers added
    ///
    /// `index` must be the leaf index `range` was resolved against.
    pub fn render_range(
        &self,
        doc: &mut Document,
        range: &ResolvedRange,
        index: &LeafIndex,
        span: &Span,
    ) -> Result<usize, RenderError> {
        let multi_leaf = !range.is_single_leaf();
        let fragments: Vec<Fragment> = range
            .fragments(index)
            .into_iter()
            .filter(|f| !multi_leaf || !is_blank_leaf(doc, f.node))
            .collect();

        let mut inserted = 0;
        for fragment in fragments {
            let marker = Marker::new(span.id.clone(), span.kind.clone());
            wrap_fragment(doc, &fragment, marker)?;
            inserted += 1;
        }

        Ok(inserted)
    }
}

fn is_blank_leaf(doc: &Document, node: NodeId) -> bool {
    doc.text(node).map(|t| t.trim().is_empty()).unwrap_or(true)
}

/// Isolate `[start, end)` of the leaf in its own text node and wrap it
fn wrap_fragment(
    doc: &mut Document,
    fragment: &Fragment,
    marker: Marker,
) -> Result<NodeId, RenderError> {
    let stale = RenderError::StaleLeaf {
        node: fragment.node,
    };

    let len = doc
        .text(fragment.node)
        .map(|t| t.chars().count())
        .ok_or_else(|| stale.clone())?;
    if len != fragment.leaf_len || fragment.end > len || fragment.start >= fragment.end {
        return Err(stale);
    }

    let mut target = fragment.node;
    if fragment.start > 0 {
        target = doc
            .split_text(target, fragment.start)
            .ok_or_else(|| stale.clone())?;
    }
    if fragment.end < len {
        // Remainder after the fragment becomes its own sibling
        doc.split_text(target, fragment.end - fragment.start);
    }

    doc.wrap_in_marker(target, marker).ok_or(stale)
}
