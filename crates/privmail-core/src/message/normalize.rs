//! Message normalizer
//!
//! Converts an `EmailMessage` into a single structured document tree for
//! condition evaluation: a `headers` subtree with one node per header
//! occurrence, and a `body` subtree with one node per leaf part in
//! document-walk order. Normalization is total: markup failures in one part
//! degrade to a parse-error marker without affecting siblings.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::model::{EmailMessage, PartBody};

/// A node in the normalized document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<DocNode>,
}

impl DocNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Value of an attribute by name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of this node and all its descendants
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        fn collect(node: &DocNode, out: &mut String) {
            if let Some(text) = &node.text {
                out.push_str(text);
            }
            for child in &node.children {
                collect(child, out);
            }
        }
        collect(self, &mut out);
        out
    }

    /// All nodes below this one, pre-order
    pub fn descendants(&self) -> Vec<&DocNode> {
        let mut out = Vec::new();
        fn walk<'a>(node: &'a DocNode, out: &mut Vec<&'a DocNode>) {
            for child in &node.children {
                out.push(child);
                walk(child, out);
            }
        }
        walk(self, &mut out);
        out
    }
}

/// Per-part markup outcome, so callers can distinguish structured matches
/// from text-only fallback matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupOutcome {
    /// HTML text that parsed as markup; the parsed elements live in the tree
    Parsed { raw: String },
    /// Text content with no markup structure
    RawTextOnly(String),
    /// Payload for which decoding is not meaningful
    Binary,
    /// HTML text whose markup failed to parse; raw text remains searchable
    ParseError { raw: String, detail: String },
}

impl MarkupOutcome {
    /// Searchable text of this part, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            MarkupOutcome::Parsed { raw } => Some(raw),
            MarkupOutcome::RawTextOnly(raw) => Some(raw),
            MarkupOutcome::Binary => None,
            MarkupOutcome::ParseError { raw, .. } => Some(raw),
        }
    }
}

/// Typed view of one normalized leaf part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPart {
    pub content_type: String,
    pub body: MarkupOutcome,
}

/// Structured tree representation of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    /// Queryable tree rooted at an `email` node with `headers` and `body`
    /// subtrees
    pub root: DocNode,
    /// Leaf parts in document order with their markup outcomes
    pub parts: Vec<NormalizedPart>,
}

/// Normalize a message into a structured document tree.
///
/// Total and deterministic: one `header` node per header occurrence in
/// original order, one body node per leaf part in depth-first order.
pub fn normalize(msg: &EmailMessage) -> NormalizedDocument {
    let mut headers = DocNode::new("headers");
    for header in &msg.headers {
        headers.children.push(
            DocNode::new("header")
                .with_attr("name", &header.name)
                .with_text(&header.value),
        );
    }

    let mut body = DocNode::new("body");
    let mut parts = Vec::new();

    for part in msg.leaf_parts() {
        let text = match &part.body {
            PartBody::Text(text) => Some(text.clone()),
            PartBody::Binary(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
            PartBody::Multipart(_) => None,
        };

        if part.content_type.eq_ignore_ascii_case("text/html") {
            // HTML payloads stay searchable even when not valid UTF-8
            let raw = text.unwrap_or_else(|| match &part.body {
                PartBody::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                _ => String::new(),
            });
            let mut node = DocNode::new("html-part");
            node.children
                .push(DocNode::new("content-type").with_text(&part.content_type));
            node.children
                .push(DocNode::new("raw-content").with_text(&raw));

            let outcome = match parse_fragment(&raw) {
                Ok(children) => {
                    node.children.extend(children);
                    MarkupOutcome::Parsed { raw }
                }
                Err(detail) => {
                    node.children
                        .push(DocNode::new("parse-error").with_text(&detail));
                    MarkupOutcome::ParseError { raw, detail }
                }
            };

            body.children.push(node);
            parts.push(NormalizedPart {
                content_type: part.content_type.clone(),
                body: outcome,
            });
        } else {
            let mut node = DocNode::new("part");
            node.children
                .push(DocNode::new("content-type").with_text(&part.content_type));

            let outcome = match text {
                Some(content) => {
                    node.children
                        .push(DocNode::new("content").with_text(&content));
                    MarkupOutcome::RawTextOnly(content)
                }
                None => {
                    node.children
                        .push(DocNode::new("content").with_text("[binary data]"));
                    MarkupOutcome::Binary
                }
            };

            body.children.push(node);
            parts.push(NormalizedPart {
                content_type: part.content_type.clone(),
                body: outcome,
            });
        }
    }

    let mut root = DocNode::new("email");
    root.children.push(headers);
    root.children.push(body);

    NormalizedDocument { root, parts }
}

/// Best-effort parse of an HTML fragment as markup, wrapped in a synthetic
/// root to tolerate document fragments
fn parse_fragment(html: &str) -> Result<Vec<DocNode>, String> {
    let wrapped = format!("<html-wrapper>{}</html-wrapper>", html);
    let mut reader = Reader::from_str(&wrapped);

    let mut stack: Vec<DocNode> = Vec::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => stack.push(node_from_start(&start)),
            Event::Empty(start) => {
                let node = node_from_start(&start);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(|e| e.to_string())?;
                if let Some(top) = stack.last_mut() {
                    match &mut top.text {
                        Some(existing) => existing.push_str(&value),
                        None => top.text = Some(value.to_string()),
                    }
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| "unbalanced markup".to_string())?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node.children),
                }
            }
            Event::Eof => return Err("unexpected end of markup".to_string()),
            _ => {}
        }
    }
}

fn node_from_start(start: &BytesStart<'_>) -> DocNode {
    let mut node = DocNode::new(String::from_utf8_lossy(start.name().as_ref()).to_string());
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = String::from_utf8_lossy(&attr.value).to_string();
        node.attrs.push((key, value));
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::model::{Header, MimePart};
    use pretty_assertions::assert_eq;

    fn find<'a>(node: &'a DocNode, name: &str) -> Vec<&'a DocNode> {
        node.descendants()
            .into_iter()
            .filter(|n| n.name == name)
            .collect()
    }

    #[test]
    fn test_headers_preserve_duplicates_and_order() {
        let mut msg = EmailMessage::new();
        msg.headers.push(Header {
            name: "Received".to_string(),
            value: "hop-1".to_string(),
        });
        msg.headers.push(Header {
            name: "Subject".to_string(),
            value: "s".to_string(),
        });
        msg.headers.push(Header {
            name: "Received".to_string(),
            value: "hop-2".to_string(),
        });

        let doc = normalize(&msg);
        let headers = find(&doc.root, "header");
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].attr("name"), Some("Received"));
        assert_eq!(headers[0].text.as_deref(), Some("hop-1"));
        assert_eq!(headers[2].text.as_deref(), Some("hop-2"));
    }

    #[test]
    fn test_well_formed_html_yields_parsed_markup() {
        let mut msg = EmailMessage::new();
        msg.append_part(MimePart::text(
            "text/html",
            "<div><img src=\"https://tracker.com/pixel.gif\"/></div>",
        ));

        let doc = normalize(&msg);
        assert_eq!(doc.parts.len(), 1);
        assert!(matches!(doc.parts[0].body, MarkupOutcome::Parsed { .. }));

        let raw = find(&doc.root, "raw-content");
        assert_eq!(raw.len(), 1);
        assert!(raw[0].text.as_deref().unwrap().contains("tracker.com"));

        let imgs = find(&doc.root, "img");
        assert_eq!(imgs.len(), 1);
        assert_eq!(imgs[0].attr("src"), Some("https://tracker.com/pixel.gif"));
    }

    #[test]
    fn test_malformed_html_degrades_to_parse_error() {
        let mut msg = EmailMessage::new();
        msg.append_part(MimePart::text("text/html", "<div><p>unclosed"));
        msg.append_part(MimePart::text("text/plain", "sibling survives"));

        let doc = normalize(&msg);
        assert_eq!(doc.parts.len(), 2);
        assert!(matches!(
            doc.parts[0].body,
            MarkupOutcome::ParseError { .. }
        ));
        // Raw text remains searchable despite the parse failure
        assert_eq!(doc.parts[0].body.text(), Some("<div><p>unclosed"));

        let errors = find(&doc.root, "parse-error");
        assert_eq!(errors.len(), 1);

        assert_eq!(
            doc.parts[1].body,
            MarkupOutcome::RawTextOnly("sibling survives".to_string())
        );
    }

    #[test]
    fn test_binary_part_gets_opaque_marker() {
        let mut msg = EmailMessage::new();
        msg.append_part(MimePart::binary(
            "application/octet-stream",
            vec![0xff, 0xfe, 0x00],
        ));

        let doc = normalize(&msg);
        assert_eq!(doc.parts[0].body, MarkupOutcome::Binary);
        let contents = find(&doc.root, "content");
        assert_eq!(contents[0].text.as_deref(), Some("[binary data]"));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let mut msg = EmailMessage::compose("a@x.com", "b@y.com", "s", "<p>hi</p>");
        msg.append_part(MimePart::text("text/plain", "extra"));

        let first = normalize(&msg);
        let second = normalize(&msg);
        assert_eq!(first, second);
    }

    #[test]
    fn test_string_value_concatenates_descendants() {
        let mut node = DocNode::new("a").with_text("x");
        node.children.push(DocNode::new("b").with_text("y"));
        node.children.push(DocNode::new("c").with_text("z"));
        assert_eq!(node.string_value(), "xyz");
    }
}
