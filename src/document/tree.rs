//! Arena-backed structured document.
//!
//! Nodes are addressed by copyable [`NodeId`]s. Three kinds of node carry
//! content: elements (tag + attributes), text leaves and markers. Markers
//! are inserted by the renderer around (parts of) text leaves and removed
//! again before every re-render.
//!
//! Adjacent text siblings are merged on construction, so the unmarked form
//! of a document is canonical: removing every marker and re-merging text
//! restores the exact leaf partitioning the document was built with.

use quick_xml::escape::{escape, partial_escape};

use crate::domain::{SpanId, SpanKind};

/// Handle to a node inside a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) const ROOT: NodeId = NodeId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

/// An element with its tag and attributes (attribute order preserved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

/// Highlight marker wrapping one fragment of a rendered span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Identity shared by every fragment of the same span
    pub span_id: SpanId,
    pub kind: SpanKind,
    /// Set while the pointer hovers any fragment of the span
    pub active: bool,
}

impl Marker {
    pub fn new(span_id: SpanId, kind: SpanKind) -> Self {
        Self {
            span_id,
            kind,
            active: false,
        }
    }

    /// Class list used when serializing the marker
    pub fn class_list(&self) -> String {
        let mut classes = format!("waymark {}", self.kind.css_class());
        if self.active {
            classes.push_str(" active");
        }
        classes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    Marker(Marker),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Elements serialized without a closing tag
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose text is written back unescaped
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

pub fn is_raw_text_tag(tag: &str) -> bool {
    RAW_TEXT_TAGS.contains(&tag)
}

/// A structured document: ordered tree of elements, text leaves and markers
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document (root only)
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            free: Vec::new(),
            root: NodeId::ROOT,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            kind,
            parent,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        node.parent = None;
        node.children.clear();
        node.kind = NodeKind::Text(String::new());
        self.free.push(id);
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Append an element as the last child of `parent`
    pub fn append_element(&mut self, parent: NodeId, element: Element) -> NodeId {
        let id = self.alloc(NodeKind::Element(element), Some(parent));
        self.node_mut(parent).children.push(id);
        id
    }

    /// Append text as the last child of `parent`
    ///
    /// Merges into a preceding text sibling. Returns the text node holding
    /// the appended text, or `None` for empty input.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Option<NodeId> {
        if text.is_empty() {
            return None;
        }

        if let Some(&last) = self.node(parent).children.last() {
            if let NodeKind::Text(ref mut existing) = self.node_mut(last).kind {
                existing.push_str(text);
                return Some(last);
            }
        }

        let id = self.alloc(NodeKind::Text(text.to_string()), Some(parent));
        self.node_mut(parent).children.push(id);
        Some(id)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id) {
            NodeKind::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn marker(&self, id: NodeId) -> Option<&Marker> {
        match self.kind(id) {
            NodeKind::Marker(m) => Some(m),
            _ => None,
        }
    }

    /// All nodes under `id` (inclusive) in document order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// First element in document order matching `predicate`
    pub fn find_element<F>(&self, from: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(from)
            .into_iter()
            .find(|&id| self.element(id).map(&predicate).unwrap_or(false))
    }

    pub fn element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.find_element(self.root, |e| e.id() == Some(element_id))
    }

    pub fn first_element_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.find_element(self.root, |e| e.tag.eq_ignore_ascii_case(tag))
    }

    /// Concatenated text under a node, hidden containers included
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    /// Every marker node in document order
    pub fn markers(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&id| self.marker(id).is_some())
            .collect()
    }

    /// Marker fragments belonging to one span, in document order
    pub fn markers_for(&self, span_id: &SpanId) -> Vec<NodeId> {
        self.markers()
            .into_iter()
            .filter(|&id| self.marker(id).map(|m| &m.span_id == span_id).unwrap_or(false))
            .collect()
    }

    /// Innermost marker containing `id` (inclusive)
    pub fn enclosing_marker(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.marker(node).is_some() {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Toggle the active state on every fragment of a span
    pub fn set_span_active(&mut self, span_id: &SpanId, active: bool) -> usize {
        let fragments = self.markers_for(span_id);
        for &id in &fragments {
            if let NodeKind::Marker(ref mut m) = self.node_mut(id).kind {
                m.active = active;
            }
        }
        fragments.len()
    }

    /// Split a text node at a character offset
    ///
    /// The original node keeps `[0, at)`; a new sibling right after it
    /// receives `[at, len)`. Returns the new node, or `None` when `at` does
    /// not fall strictly inside the text.
    pub(crate) fn split_text(&mut self, id: NodeId, at: usize) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let tail = match self.node_mut(id).kind {
            NodeKind::Text(ref mut text) => {
                let byte = text.char_indices().nth(at).map(|(b, _)| b)?;
                if byte == 0 {
                    return None;
                }
                text.split_off(byte)
            }
            _ => return None,
        };

        let new_id = self.alloc(NodeKind::Text(tail), Some(parent));
        let siblings = &mut self.node_mut(parent).children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.insert(pos + 1, new_id);
        Some(new_id)
    }

    /// Wrap a node in a marker occupying its former position
    pub(crate) fn wrap_in_marker(&mut self, id: NodeId, marker: Marker) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let pos = self.children(parent).iter().position(|&c| c == id)?;

        let marker_id = self.alloc(NodeKind::Marker(marker), Some(parent));
        self.node_mut(parent).children[pos] = marker_id;
        self.node_mut(marker_id).children.push(id);
        self.node_mut(id).parent = Some(marker_id);
        Some(marker_id)
    }

    /// Remove every marker, splice its children back and re-merge text
    ///
    /// Returns the number of markers removed.
    pub fn clear_markers(&mut self) -> usize {
        let markers = self.markers();
        let mut touched = Vec::new();

        // Innermost first so nested markers unwrap cleanly
        for &marker_id in markers.iter().rev() {
            let Some(parent) = self.parent(marker_id) else {
                continue;
            };
            let children = std::mem::take(&mut self.node_mut(marker_id).children);
            for &child in &children {
                self.node_mut(child).parent = Some(parent);
            }

            let siblings = &mut self.node_mut(parent).children;
            if let Some(pos) = siblings.iter().position(|&c| c == marker_id) {
                siblings.splice(pos..pos + 1, children);
            }
            self.release(marker_id);
            touched.push(parent);
        }

        touched.sort();
        touched.dedup();
        for parent in touched {
            // A parent may itself have been a released marker
            if self.free.contains(&parent) {
                continue;
            }
            self.merge_adjacent_text(parent);
        }

        markers.len()
    }

    /// Merge runs of adjacent text children into their first node
    fn merge_adjacent_text(&mut self, parent: NodeId) {
        let children = self.children(parent).to_vec();
        let mut kept = Vec::with_capacity(children.len());
        let mut absorbed = Vec::new();

        for child in children {
            let prev_text = kept.last().copied().filter(|&p| self.text(p).is_some());
            let child_text = self.text(child).map(str::to_string);
            match (prev_text, child_text) {
                (Some(prev), Some(text)) => {
                    if let NodeKind::Text(ref mut existing) = self.node_mut(prev).kind {
                        existing.push_str(&text);
                    }
                    absorbed.push(child);
                }
                _ => kept.push(child),
            }
        }

        self.node_mut(parent).children = kept;
        for id in absorbed {
            self.release(id);
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize the document back to markup, markers included
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for &child in self.children(self.root) {
            self.write_node(child, false, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, raw_text: bool, out: &mut String) {
        match self.kind(id) {
            NodeKind::Root => {
                for &child in self.children(id) {
                    self.write_node(child, false, out);
                }
            }
            NodeKind::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&partial_escape(text.as_str()));
                }
            }
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.tag);
                for (name, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape(value.as_str()));
                    out.push('"');
                }

                if is_void_tag(&element.tag) && self.children(id).is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');

                let raw = is_raw_text_tag(&element.tag);
                for &child in self.children(id) {
                    self.write_node(child, raw, out);
                }

                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
            NodeKind::Marker(marker) => {
                out.push_str("<mark class=\"");
                out.push_str(&escape(marker.class_list().as_str()));
                out.push_str("\" data-span-id=\"");
                out.push_str(&escape(marker.span_id.to_string().as_str()));
                out.push_str("\">");
                for &child in self.children(id) {
                    self.write_node(child, false, out);
                }
                out.push_str("</mark>");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let p = doc.append_element(doc.root(), Element::new("p").with_attr("id", "intro"));
        let text = doc.append_text(p, "Hello world").unwrap();
        (doc, p, text)
    }

    #[test]
    fn test_append_text_merges_siblings() {
        let (mut doc, p, text) = sample();
        let again = doc.append_text(p, ", again").unwrap();
        assert_eq!(again, text);
        assert_eq!(doc.text(text), Some("Hello world, again"));
        assert_eq!(doc.children(p).len(), 1);
    }

    #[test]
    fn test_split_and_wrap_then_clear_restores_identity() {
        let (mut doc, p, text) = sample();
        let before = doc.to_markup();

        let tail = doc.split_text(text, 6).unwrap();
        assert_eq!(doc.text(text), Some("Hello "));
        assert_eq!(doc.text(tail), Some("world"));

        let marker = doc
            .wrap_in_marker(tail, Marker::new(SpanId::Number(1), SpanKind::UserHighlight))
            .unwrap();
        assert_eq!(doc.children(p), &[text, marker]);
        assert!(doc.to_markup().contains("<mark class=\"waymark kind-user_highlight\" data-span-id=\"1\">world</mark>"));

        assert_eq!(doc.clear_markers(), 1);
        assert_eq!(doc.children(p), &[text]);
        assert_eq!(doc.text(text), Some("Hello world"));
        assert_eq!(doc.to_markup(), before);
    }

    #[test]
    fn test_split_outside_text_is_noop() {
        let (mut doc, _, text) = sample();
        assert!(doc.split_text(text, 0).is_none());
        assert!(doc.split_text(text, 11).is_none());
        assert!(doc.split_text(text, 40).is_none());
    }

    #[test]
    fn test_split_respects_multibyte_chars() {
        let mut doc = Document::new();
        let text = doc.append_text(doc.root(), "héllo").unwrap();
        let tail = doc.split_text(text, 2).unwrap();
        assert_eq!(doc.text(text), Some("hé"));
        assert_eq!(doc.text(tail), Some("llo"));
    }

    #[test]
    fn test_set_span_active_touches_all_fragments() {
        let mut doc = Document::new();
        let a = doc.append_element(doc.root(), Element::new("p"));
        let b = doc.append_element(doc.root(), Element::new("p"));
        let ta = doc.append_text(a, "one").unwrap();
        let tb = doc.append_text(b, "two").unwrap();
        let id = SpanId::Number(9);
        doc.wrap_in_marker(ta, Marker::new(id.clone(), SpanKind::LinkSubject));
        doc.wrap_in_marker(tb, Marker::new(id.clone(), SpanKind::LinkSubject));

        assert_eq!(doc.set_span_active(&id, true), 2);
        assert!(doc.markers_for(&id).iter().all(|&m| doc.marker(m).unwrap().active));
        assert_eq!(doc.enclosing_marker(tb), doc.markers_for(&id).last().copied());
    }

    #[test]
    fn test_void_and_raw_serialization() {
        let mut doc = Document::new();
        let body = doc.append_element(doc.root(), Element::new("body"));
        doc.append_element(body, Element::new("br"));
        let script = doc.append_element(body, Element::new("script"));
        doc.append_text(script, "if (a < b) {}");
        doc.append_text(body, "x < y");

        assert_eq!(
            doc.to_markup(),
            "<body><br/><script>if (a < b) {}</script>x &lt; y</body>"
        );
    }
}
