//! Owned message model
//!
//! `EmailMessage` is the already-parsed message surface the core operates
//! on: ordered header enumeration, a recursive part walk, per-part
//! content-type/filename/description/payload access, and append-part. It is
//! built from raw RFC 5322 bytes with `mail-parser` or programmatically, and
//! re-serialized with `mail-builder` for transport collaborators.

use mail_builder::headers::raw::Raw;
use mail_builder::mime::MimePart as BuilderPart;
use mail_builder::MessageBuilder;
use mail_parser::{Address, HeaderValue, MessageParser, MimeHeaders, PartType};
use privmail_common::{Error, Result};

/// A single header occurrence. Duplicates are preserved in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A MIME part: a leaf with a payload, or a container with children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    pub content_type: String,
    pub filename: Option<String>,
    pub description: Option<String>,
    pub body: PartBody,
}

/// Part payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    /// Decoded text content
    Text(String),
    /// Opaque binary content
    Binary(Vec<u8>),
    /// Container part; children walk in document order
    Multipart(Vec<MimePart>),
}

impl MimePart {
    /// Create a text leaf part
    pub fn text(content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: None,
            description: None,
            body: PartBody::Text(body.into()),
        }
    }

    /// Create a binary leaf part
    pub fn binary(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: None,
            description: None,
            body: PartBody::Binary(body),
        }
    }

    /// Create a container part
    pub fn multipart(content_type: impl Into<String>, children: Vec<MimePart>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: None,
            description: None,
            body: PartBody::Multipart(children),
        }
    }

    /// Set the attachment filename
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the content description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Decoded text of this part, if it carries text
    pub fn decoded_text(&self) -> Option<&str> {
        match &self.body {
            PartBody::Text(text) => Some(text),
            _ => None,
        }
    }

    fn is_container(&self) -> bool {
        matches!(self.body, PartBody::Multipart(_))
    }
}

/// An owned, already-parsed email message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailMessage {
    pub headers: Vec<Header>,
    pub parts: Vec<MimePart>,
}

impl EmailMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw RFC 5322 bytes into an owned message
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| Error::Decode("Failed to parse message".to_string()))?;

        let headers = parsed
            .headers()
            .iter()
            .map(|h| Header {
                name: h.name().to_string(),
                value: header_value_text(h.value()),
            })
            .collect();

        let parts = convert_part(&parsed, 0)
            .map(|root| match root.body {
                PartBody::Multipart(children) => children,
                _ => vec![root],
            })
            .unwrap_or_default();

        Ok(Self { headers, parts })
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Set a header, overwriting the first existing occurrence in place
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.value = value,
            None => self.headers.push(Header {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Append a top-level body part
    pub fn append_part(&mut self, part: MimePart) {
        self.parts.push(part);
    }

    /// Leaf parts in depth-first document order; containers are not emitted
    pub fn leaf_parts(&self) -> Vec<&MimePart> {
        let mut leaves = Vec::new();
        fn walk<'a>(parts: &'a [MimePart], out: &mut Vec<&'a MimePart>) {
            for part in parts {
                match &part.body {
                    PartBody::Multipart(children) => walk(children, out),
                    _ => out.push(part),
                }
            }
        }
        walk(&self.parts, &mut leaves);
        leaves
    }

    /// Compose a message with From/To/Subject headers and an HTML body
    /// wrapped in a multipart/alternative container
    pub fn compose(from: &str, to: &str, subject: &str, body_html: &str) -> Self {
        let mut msg = Self::new();
        msg.set_header("From", from);
        msg.set_header("To", to);
        msg.set_header("Subject", subject);
        msg.append_part(MimePart::multipart(
            "multipart/alternative",
            vec![MimePart::text("text/html", body_html)],
        ));
        msg
    }

    /// Serialize to wire bytes
    pub fn to_raw(&self) -> Result<Vec<u8>> {
        let mut builder = MessageBuilder::new();

        for header in &self.headers {
            // Structure headers are derived from the body being built
            if header.name.eq_ignore_ascii_case("Content-Type")
                || header.name.eq_ignore_ascii_case("Content-Transfer-Encoding")
                || header.name.eq_ignore_ascii_case("MIME-Version")
            {
                continue;
            }
            builder = builder.header(header.name.as_str(), Raw::new(header.value.as_str()));
        }

        let body = match self.parts.len() {
            0 => BuilderPart::new("text/plain", ""),
            1 => builder_part(&self.parts[0]),
            _ => BuilderPart::new(
                "multipart/mixed",
                self.parts.iter().map(builder_part).collect::<Vec<_>>(),
            ),
        };

        builder
            .body(body)
            .write_to_vec()
            .map_err(|e| Error::Internal(format!("Failed to serialize message: {}", e)))
    }
}

fn builder_part<'x>(part: &'x MimePart) -> BuilderPart<'x> {
    let built = match &part.body {
        PartBody::Text(text) => BuilderPart::new(part.content_type.as_str(), text.as_str()),
        PartBody::Binary(bytes) => BuilderPart::new(part.content_type.as_str(), bytes.as_slice()),
        PartBody::Multipart(children) => BuilderPart::new(
            part.content_type.as_str(),
            children.iter().map(builder_part).collect::<Vec<_>>(),
        ),
    };
    match &part.filename {
        Some(filename) => built.attachment(filename.as_str()),
        None => built,
    }
}

fn convert_part(msg: &mail_parser::Message<'_>, part_id: usize) -> Option<MimePart> {
    let part = msg.part(part_id)?;

    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "text/plain".to_string());

    let filename = part.attachment_name().map(str::to_string);
    let description = part.content_description().map(str::to_string);

    let body = match &part.body {
        PartType::Text(text) | PartType::Html(text) => PartBody::Text(text.to_string()),
        PartType::Multipart(children) => PartBody::Multipart(
            children
                .iter()
                .filter_map(|child| convert_part(msg, *child))
                .collect(),
        ),
        _ => PartBody::Binary(part.contents().to_vec()),
    };

    Some(MimePart {
        content_type,
        filename,
        description,
        body,
    })
}

/// Best-effort textual rendering of a parsed header value
fn header_value_text(value: &HeaderValue<'_>) -> String {
    match value {
        HeaderValue::Text(text) => text.to_string(),
        HeaderValue::TextList(list) => list.join(", "),
        HeaderValue::Address(Address::List(addrs)) => addrs
            .iter()
            .filter_map(|a| a.address().map(str::to_string))
            .collect::<Vec<_>>()
            .join(", "),
        HeaderValue::Address(Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .filter_map(|a| a.address().map(str::to_string))
            .collect::<Vec<_>>()
            .join(", "),
        HeaderValue::DateTime(dt) => dt.to_rfc3339(),
        HeaderValue::ContentType(ct) => match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        },
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw_multipart() -> Vec<u8> {
        concat!(
            "From: alice@example.com\r\n",
            "To: bob@example.com\r\n",
            "Subject: hello\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Disposition: attachment; filename=\"data.bin\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "AAEC\r\n",
            "--outer--\r\n",
        )
        .as_bytes()
        .to_vec()
    }

    #[test]
    fn test_parse_preserves_header_order() {
        let msg = EmailMessage::parse(&raw_multipart()).unwrap();
        let names: Vec<&str> = msg.headers.iter().map(|h| h.name.as_str()).collect();
        let from_pos = names.iter().position(|n| *n == "From").unwrap();
        let subject_pos = names.iter().position(|n| *n == "Subject").unwrap();
        assert!(from_pos < subject_pos);
        assert_eq!(msg.header("subject"), Some("hello"));
    }

    #[test]
    fn test_parse_walks_nested_parts() {
        let msg = EmailMessage::parse(&raw_multipart()).unwrap();
        let leaves = msg.leaf_parts();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].content_type, "text/plain");
        assert_eq!(leaves[1].content_type, "text/html");
        assert_eq!(leaves[1].decoded_text(), Some("<p>html body</p>"));
        assert_eq!(leaves[2].content_type, "application/octet-stream");
        assert_eq!(leaves[2].filename.as_deref(), Some("data.bin"));
        assert_eq!(leaves[2].body, PartBody::Binary(vec![0, 1, 2]));
    }

    #[test]
    fn test_set_header_overwrites_in_place() {
        let mut msg = EmailMessage::new();
        msg.set_header("X-Privacy-Policy", "first");
        msg.set_header("Subject", "s");
        msg.set_header("X-Privacy-Policy", "second");

        assert_eq!(msg.header("X-Privacy-Policy"), Some("second"));
        assert_eq!(msg.headers.len(), 2);
        assert_eq!(msg.headers[0].name, "X-Privacy-Policy");
    }

    #[test]
    fn test_compose_structure() {
        let msg = EmailMessage::compose("a@x.com", "b@y.com", "subj", "<p>hi</p>");
        assert_eq!(msg.header("From"), Some("a@x.com"));
        let leaves = msg.leaf_parts();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].content_type, "text/html");
    }

    #[test]
    fn test_raw_round_trip() {
        let mut msg = EmailMessage::compose("a@x.com", "b@y.com", "subj", "<p>hi</p>");
        msg.append_part(
            MimePart::binary("application/octet-stream", vec![1, 2, 3])
                .with_filename("blob.bin"),
        );

        let raw = msg.to_raw().unwrap();
        let reparsed = EmailMessage::parse(&raw).unwrap();

        assert_eq!(reparsed.header("Subject"), Some("subj"));
        let leaves = reparsed.leaf_parts();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].decoded_text(), Some("<p>hi</p>"));
        assert_eq!(leaves[1].filename.as_deref(), Some("blob.bin"));
        assert_eq!(leaves[1].body, PartBody::Binary(vec![1, 2, 3]));
    }
}
