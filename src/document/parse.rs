//! Lenient (X)HTML reader producing a [`Document`].
//!
//! Built on `quick_xml` with end-name checks disabled so ordinary HTML
//! survives: void elements without a closing slash, stray end tags,
//! attributes without values and HTML5 named entities. `script` and
//! `style` bodies are read raw so their contents never trip the tokenizer.

use std::borrow::Cow;

use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::tree::{is_raw_text_tag, is_void_tag, Document, Element, NodeId};

/// Errors raised while reading markup
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Markup error at byte {position}: {message}")]
    Syntax { position: u64, message: String },
}

/// Parse markup into a document tree
pub fn parse_markup(markup: &str) -> Result<Document, ParseError> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut doc = Document::new();
    // Open elements with their lowercase tag names
    let mut stack: Vec<(NodeId, String)> = vec![(doc.root(), String::new())];

    loop {
        let event = reader.read_event().map_err(|err| ParseError::Syntax {
            position: reader.buffer_position() as u64,
            message: err.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                let element = element_from(&e);
                let tag = element.tag.clone();
                let id = doc.append_element(current(&stack), element);

                if is_void_tag(&tag) {
                    continue;
                }

                if is_raw_text_tag(&tag) {
                    let end = e.to_end().into_owned();
                    let raw = reader.read_text(end.name()).map_err(|err| ParseError::Syntax {
                        position: reader.buffer_position() as u64,
                        message: format!("unterminated <{}>: {}", tag, err),
                    })?;
                    doc.append_text(id, &raw);
                    continue;
                }

                stack.push((id, tag));
            }
            Event::Empty(e) => {
                doc.append_element(current(&stack), element_from(&e));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                // Close up to the nearest matching open element; ignore strays
                if let Some(pos) = stack.iter().rposition(|(_, tag)| *tag == name) {
                    if pos > 0 {
                        stack.truncate(pos);
                    }
                }
            }
            Event::Text(e) => {
                let text = match e.unescape_with(resolve_entity) {
                    Ok(text) => text,
                    Err(_) => String::from_utf8_lossy(&e).into_owned().into(),
                };
                doc.append_text(current(&stack), &text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e);
                doc.append_text(current(&stack), &text);
            }
            Event::Eof => break,
            // Comments, declarations, processing instructions, doctype
            _ => {}
        }
    }

    Ok(doc)
}

fn current(stack: &[(NodeId, String)]) -> NodeId {
    stack.last().map(|(id, _)| *id).unwrap_or(NodeId::ROOT)
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name))
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(tag);

    for attr in start.html_attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let value: Cow<'_, str> = match attr.unescape_value_with(resolve_entity) {
            Ok(value) => value,
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned().into(),
        };
        element.attrs.push((key, value.into_owned()));
    }

    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tree::NodeKind;

    #[test]
    fn test_parse_simple_document() {
        let doc = parse_markup("<div id=\"a\"><p>Hello <b>bold</b> world</p></div>").unwrap();
        let div = doc.element_by_id("a").unwrap();
        assert_eq!(doc.text_content(div), "Hello bold world");
    }

    #[test]
    fn test_parse_html_quirks() {
        let markup = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Page - Site</title>
<script>var x = 1 < 2 && true;</script></head>
<body class="action-view"><p>A&nbsp;B &amp; C<br>next</p><input disabled></body></html>"#;

        let doc = parse_markup(markup).unwrap();
        let body = doc.first_element_by_tag("body").unwrap();
        assert_eq!(doc.text_content(body), "A\u{a0}B & Cnext");

        let script = doc.first_element_by_tag("script").unwrap();
        assert_eq!(doc.text_content(script), "var x = 1 < 2 && true;");

        // <br> did not swallow the following text
        let p = doc.first_element_by_tag("p").unwrap();
        assert_eq!(doc.children(p).len(), 3);
    }

    #[test]
    fn test_stray_end_tag_is_ignored() {
        let doc = parse_markup("<p>one</span>two</p>").unwrap();
        let p = doc.first_element_by_tag("p").unwrap();
        assert_eq!(doc.children(p).len(), 1);
        assert!(matches!(doc.kind(doc.children(p)[0]), NodeKind::Text(t) if t == "onetwo"));
    }

    #[test]
    fn test_comment_between_text_merges() {
        let doc = parse_markup("<p>one<!-- note -->two</p>").unwrap();
        let p = doc.first_element_by_tag("p").unwrap();
        assert_eq!(doc.children(p).len(), 1);
    }
}
