//! Flattened text view of a document.
//!
//! The extractor defines the single coordinate space every offset is
//! measured in: the concatenation, in document order, of all visible text
//! leaves under the configured content boundary. Offsets count characters
//! (Unicode scalar values), not bytes.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::tree::{Document, NodeId, NodeKind};

/// Containers whose text never renders
pub const DEFAULT_HIDDEN_TAGS: &[&str] = &[
    "head", "title", "script", "style", "noscript", "template", "meta", "link", "iframe",
    "object",
];

/// Which subtree of the document counts as content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBoundary {
    /// The whole document
    Document,
    /// The first `<body>` element
    Body,
    /// The element with this id (falls back to `Body` when missing)
    ElementId(String),
}

impl Default for ContentBoundary {
    fn default() -> Self {
        ContentBoundary::Body
    }
}

/// Filtering rules for extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRules {
    pub boundary: ContentBoundary,
    pub hidden_tags: Vec<String>,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            boundary: ContentBoundary::default(),
            hidden_tags: DEFAULT_HIDDEN_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl ExtractionRules {
    pub fn with_boundary(boundary: ContentBoundary) -> Self {
        Self {
            boundary,
            ..Default::default()
        }
    }

    fn is_hidden(&self, tag: &str) -> bool {
        self.hidden_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Flattened text with character-indexed access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatText {
    text: String,
    /// Byte offset of every char, plus the total length as sentinel
    char_bytes: Vec<usize>,
}

impl FlatText {
    pub fn new(text: String) -> Self {
        let mut char_bytes: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        char_bytes.push(text.len());
        Self { text, char_bytes }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.char_bytes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn byte_range(&self, range: &Range<usize>) -> Option<Range<usize>> {
        if range.start > range.end || range.end > self.char_len() {
            return None;
        }
        Some(self.char_bytes[range.start]..self.char_bytes[range.end])
    }

    /// Text between two character offsets
    pub fn slice(&self, range: Range<usize>) -> Option<&str> {
        self.byte_range(&range).map(|bytes| &self.text[bytes])
    }

    /// Character index of a byte offset that sits on a char boundary
    fn char_index(&self, byte: usize) -> usize {
        match self.char_bytes.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    /// First occurrence of `needle` fully inside `within` (char offsets)
    pub fn find(&self, needle: &str, within: Range<usize>) -> Option<usize> {
        let bytes = self.byte_range(&within)?;
        let rel = self.text[bytes.clone()].find(needle)?;
        Some(self.char_index(bytes.start + rel))
    }

    /// Last occurrence of `needle` fully inside `within` (char offsets)
    pub fn rfind(&self, needle: &str, within: Range<usize>) -> Option<usize> {
        let bytes = self.byte_range(&within)?;
        let rel = self.text[bytes.clone()].rfind(needle)?;
        Some(self.char_index(bytes.start + rel))
    }

    /// Content digest, used to tell document revisions apart in reports
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// One text leaf and its position in the flattened text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    pub node: NodeId,
    /// Character offset of the leaf's first character
    pub start: usize,
    /// Length in characters (never zero)
    pub len: usize,
}

impl Leaf {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Ordered (leaf, length) partition of the flattened text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafIndex {
    leaves: Vec<Leaf>,
    total: usize,
}

impl LeafIndex {
    /// Build from (node, length) pairs in document order
    pub fn from_lengths(entries: impl IntoIterator<Item = (NodeId, usize)>) -> Self {
        let mut leaves = Vec::new();
        let mut total = 0;
        for (node, len) in entries {
            if len == 0 {
                continue;
            }
            leaves.push(Leaf {
                node,
                start: total,
                len,
            });
            total += len;
        }
        Self { leaves, total }
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    pub fn get(&self, index: usize) -> Option<&Leaf> {
        self.leaves.get(index)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Total flattened length in characters
    pub fn total_len(&self) -> usize {
        self.total
    }
}

/// Result of one extraction pass
#[derive(Debug, Clone)]
pub struct Extraction {
    pub flat: FlatText,
    pub leaves: LeafIndex,
    /// Root of the subtree that was walked
    pub boundary: NodeId,
}

/// Produces the flattened text and leaf partition of a document
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    rules: ExtractionRules,
}

impl TextExtractor {
    pub fn new(rules: ExtractionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ExtractionRules {
        &self.rules
    }

    /// Flattened text plus the leaf partition
    pub fn extract(&self, doc: &Document) -> Extraction {
        let boundary = self.boundary_node(doc);
        let leaves = self.visible_leaves(doc, boundary);

        let mut text = String::new();
        let mut lengths = Vec::with_capacity(leaves.len());
        for node in leaves {
            if let Some(t) = doc.text(node) {
                text.push_str(t);
                lengths.push((node, t.chars().count()));
            }
        }

        Extraction {
            flat: FlatText::new(text),
            leaves: LeafIndex::from_lengths(lengths),
            boundary,
        }
    }

    /// Leaf partition only (no string building)
    pub fn leaf_index(&self, doc: &Document) -> LeafIndex {
        let boundary = self.boundary_node(doc);
        LeafIndex::from_lengths(
            self.visible_leaves(doc, boundary)
                .into_iter()
                .filter_map(|node| doc.text(node).map(|t| (node, t.chars().count()))),
        )
    }

    fn boundary_node(&self, doc: &Document) -> NodeId {
        let body = || doc.first_element_by_tag("body").unwrap_or(doc.root());
        match &self.rules.boundary {
            ContentBoundary::Document => doc.root(),
            ContentBoundary::Body => body(),
            ContentBoundary::ElementId(id) => match doc.element_by_id(id) {
                Some(node) => node,
                None => {
                    warn!(boundary = %id, "Content boundary not found, using <body>");
                    body()
                }
            },
        }
    }

    /// Visible text nodes under `root`, in document order
    fn visible_leaves(&self, doc: &Document, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            match doc.kind(node) {
                NodeKind::Text(t) => {
                    if !t.is_empty() {
                        out.push(node);
                    }
                    continue;
                }
                NodeKind::Element(e) if self.rules.is_hidden(&e.tag) => continue,
                _ => {}
            }
            for &child in doc.children(node).iter().rev() {
                stack.push(child);
            }
        }

        out
    }
}
