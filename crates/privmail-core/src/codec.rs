//! Attachment Codec
//!
//! Embeds and recovers a serialized policy inside a message across three
//! redundant channels: a dedicated header (base64), a dedicated MIME part
//! (raw XML), and an HTML-comment sentinel pair embedded in the body.
//! Extraction tries the channels in fixed priority order and falls through
//! on decode failure; absence of a policy is a valid outcome, not an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use privmail_common::Error;
use regex::RegexBuilder;
use serde::Serialize;
use tracing::debug;

use crate::message::{EmailMessage, MimePart, PartBody};
use crate::policy::PrivacyPolicy;

/// Dedicated header field carrying the base64-encoded policy
pub const PRIVACY_HEADER: &str = "X-Privacy-Policy";

/// Content-type of the dedicated policy part
pub const PRIVACY_MIME_TYPE: &str = "application/xml+privacy-policy";

/// Sentinel filename of the dedicated policy part
pub const PRIVACY_FILENAME: &str = "privacy-policy.xml";

/// Description marker of the dedicated policy part
pub const PRIVACY_DESCRIPTION: &str = "Email Privacy Policy Metadata";

/// Body-embedded sentinel markers
pub const BODY_MARKER_START: &str = "PRIVACY-POLICY-START";
pub const BODY_MARKER_END: &str = "PRIVACY-POLICY-END";

/// Channel used to attach a policy to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Header,
    Part,
    Both,
}

/// Result of validating policy attachment integrity across both channels
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationRecord {
    pub has_header: bool,
    pub has_mime_part: bool,
    pub policy_extractable: bool,
    pub policy_xml: Option<String>,
    pub errors: Vec<String>,
}

/// Attaches and extracts privacy policies from messages
pub struct PolicyCodec;

impl PolicyCodec {
    /// Attach a serialized policy to a message over the given channel.
    ///
    /// The header channel overwrites any prior value; the part channel
    /// appends a new dedicated part. `Both` performs both, and the result
    /// is valid input to either extraction path independently.
    pub fn attach(msg: &mut EmailMessage, policy_xml: &str, channel: Channel) {
        if matches!(channel, Channel::Header | Channel::Both) {
            let encoded = BASE64.encode(policy_xml.as_bytes());
            msg.set_header(PRIVACY_HEADER, encoded);
        }

        if matches!(channel, Channel::Part | Channel::Both) {
            msg.append_part(
                MimePart::text(PRIVACY_MIME_TYPE, policy_xml)
                    .with_filename(PRIVACY_FILENAME)
                    .with_description(PRIVACY_DESCRIPTION),
            );
        }
    }

    /// Extract a serialized policy from a message, trying the channels in
    /// fixed priority order and short-circuiting on first success.
    pub fn extract(msg: &EmailMessage) -> Option<String> {
        // Method 1: dedicated header (fastest)
        if let Some(encoded) = msg.header(PRIVACY_HEADER) {
            match decode_header(encoded) {
                Ok(policy_xml) => {
                    debug!("Extracted policy from {} header", PRIVACY_HEADER);
                    return Some(policy_xml);
                }
                Err(e) => {
                    debug!("Failed to decode header policy: {}", e);
                }
            }
        }

        // Method 2: dedicated MIME part
        for part in msg.leaf_parts() {
            if !is_policy_part(part) {
                continue;
            }
            match part_text(part) {
                Some(policy_xml) if !policy_xml.is_empty() => {
                    debug!("Extracted policy from MIME part");
                    return Some(policy_xml);
                }
                _ => {
                    debug!("Failed to decode MIME part policy payload");
                }
            }
        }

        // Method 3: body-embedded sentinels (fallback)
        if let Some(policy_xml) = extract_from_body(msg) {
            debug!("Extracted policy from message body");
            return Some(policy_xml);
        }

        debug!("No privacy policy found in message");
        None
    }

    /// Validate that a policy is properly attached and accessible.
    ///
    /// Both channels are checked independently, even if one already
    /// resolved; per-channel failures are recorded without aborting.
    pub fn validate(msg: &EmailMessage) -> ValidationRecord {
        let mut record = ValidationRecord::default();

        if let Some(encoded) = msg.header(PRIVACY_HEADER) {
            record.has_header = true;
            match decode_header(encoded).and_then(|xml| {
                PrivacyPolicy::from_xml(&xml)
                    .map(|_| xml)
                    .map_err(|e| e.to_string())
            }) {
                Ok(xml) => {
                    record.policy_extractable = true;
                    if record.policy_xml.is_none() {
                        record.policy_xml = Some(xml);
                    }
                }
                Err(e) => record
                    .errors
                    .push(Error::Validation(format!("Header policy invalid: {}", e)).to_string()),
            }
        }

        for part in msg.leaf_parts() {
            if part.content_type != PRIVACY_MIME_TYPE {
                continue;
            }
            record.has_mime_part = true;
            let outcome = part_text(part)
                .ok_or_else(|| "payload not decodable as UTF-8".to_string())
                .and_then(|xml| {
                    PrivacyPolicy::from_xml(&xml)
                        .map(|_| xml)
                        .map_err(|e| e.to_string())
                });
            match outcome {
                Ok(xml) => {
                    record.policy_extractable = true;
                    record.policy_xml = Some(xml);
                }
                Err(e) => record
                    .errors
                    .push(Error::Validation(format!("MIME policy invalid: {}", e)).to_string()),
            }
        }

        record
    }

    /// Build a complete message with an HTML body and the policy attached
    /// over both channels
    pub fn compose_with_policy(
        from: &str,
        to: &str,
        subject: &str,
        body_html: &str,
        policy_xml: &str,
    ) -> EmailMessage {
        let mut msg = EmailMessage::compose(from, to, subject, body_html);
        Self::attach(&mut msg, policy_xml, Channel::Both);
        msg
    }
}

fn decode_header(encoded: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| format!("base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("utf-8: {}", e))
}

fn is_policy_part(part: &MimePart) -> bool {
    part.content_type == PRIVACY_MIME_TYPE
        || part.filename.as_deref() == Some(PRIVACY_FILENAME)
        || (part.content_type == "application/xml"
            && part
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains("privacy")))
}

/// Decoded text of a leaf part, tolerating payloads parsed as binary
fn part_text(part: &MimePart) -> Option<String> {
    match &part.body {
        PartBody::Text(text) => Some(text.clone()),
        PartBody::Binary(bytes) => String::from_utf8(bytes.clone()).ok(),
        PartBody::Multipart(_) => None,
    }
}

fn extract_from_body(msg: &EmailMessage) -> Option<String> {
    let pattern = format!(
        r"<!--\s*{}(.*?){}\s*-->",
        BODY_MARKER_START, BODY_MARKER_END
    );
    // The marker pattern is a compile-time constant; build cannot fail
    let re = RegexBuilder::new(&pattern)
        .dot_matches_new_line(true)
        .build()
        .ok()?;

    for part in msg.leaf_parts() {
        if !part.content_type.eq_ignore_ascii_case("text/html") {
            continue;
        }
        let Some(html) = part_text(part) else {
            continue;
        };
        if let Some(captures) = re.captures(&html) {
            return Some(captures[1].trim().to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::templates;
    use pretty_assertions::assert_eq;

    fn sample_xml() -> String {
        templates::attachment_control("tester").to_xml().unwrap()
    }

    #[test]
    fn test_attach_header_overwrites_prior_value() {
        let mut msg = EmailMessage::new();
        PolicyCodec::attach(&mut msg, "first", Channel::Header);
        PolicyCodec::attach(&mut msg, "second", Channel::Header);

        let count = msg
            .headers
            .iter()
            .filter(|h| h.name == PRIVACY_HEADER)
            .count();
        assert_eq!(count, 1);
        assert_eq!(PolicyCodec::extract(&msg), Some("second".to_string()));
    }

    #[test]
    fn test_attach_part_carries_unencoded_policy() {
        let xml = sample_xml();
        let mut msg = EmailMessage::new();
        PolicyCodec::attach(&mut msg, &xml, Channel::Part);

        let leaves = msg.leaf_parts();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].content_type, PRIVACY_MIME_TYPE);
        assert_eq!(leaves[0].filename.as_deref(), Some(PRIVACY_FILENAME));
        assert_eq!(leaves[0].description.as_deref(), Some(PRIVACY_DESCRIPTION));
        assert_eq!(leaves[0].decoded_text(), Some(xml.as_str()));
    }

    #[test]
    fn test_header_channel_wins_over_part() {
        let mut msg = EmailMessage::new();
        PolicyCodec::attach(&mut msg, "part-policy", Channel::Part);
        PolicyCodec::attach(&mut msg, "header-policy", Channel::Header);

        assert_eq!(
            PolicyCodec::extract(&msg),
            Some("header-policy".to_string())
        );
    }

    #[test]
    fn test_corrupt_header_falls_through_to_part() {
        let mut msg = EmailMessage::new();
        PolicyCodec::attach(&mut msg, "part-policy", Channel::Part);
        msg.set_header(PRIVACY_HEADER, "!!! not base64 !!!");

        assert_eq!(PolicyCodec::extract(&msg), Some("part-policy".to_string()));
    }

    #[test]
    fn test_part_qualifies_by_generic_xml_with_description() {
        let mut msg = EmailMessage::new();
        msg.append_part(
            MimePart::text("application/xml", "<policy/>")
                .with_description("Contains PRIVACY metadata"),
        );

        assert_eq!(PolicyCodec::extract(&msg), Some("<policy/>".to_string()));
    }

    #[test]
    fn test_body_sentinel_fallback_returns_trimmed_text() {
        let mut msg = EmailMessage::new();
        msg.append_part(MimePart::text(
            "text/html",
            "<p>hello</p><!-- PRIVACY-POLICY-START\n  <PrivacyPolicy version=\"1.0\"/>\n  PRIVACY-POLICY-END -->",
        ));

        assert_eq!(
            PolicyCodec::extract(&msg),
            Some("<PrivacyPolicy version=\"1.0\"/>".to_string())
        );
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let msg = EmailMessage::compose("a@x.com", "b@y.com", "s", "<p>plain</p>");
        assert_eq!(PolicyCodec::extract(&msg), None);
    }

    #[test]
    fn test_validate_both_channels() {
        let xml = sample_xml();
        let mut msg = EmailMessage::compose("a@x.com", "b@y.com", "s", "<p>hi</p>");
        PolicyCodec::attach(&mut msg, &xml, Channel::Both);

        let record = PolicyCodec::validate(&msg);
        assert!(record.has_header);
        assert!(record.has_mime_part);
        assert!(record.policy_extractable);
        assert!(record.errors.is_empty());
        assert_eq!(record.policy_xml.as_deref(), Some(xml.as_str()));
    }

    #[test]
    fn test_validate_records_per_channel_errors() {
        let mut msg = EmailMessage::new();
        msg.set_header(PRIVACY_HEADER, BASE64.encode("not a policy"));
        msg.append_part(
            MimePart::text(PRIVACY_MIME_TYPE, "<Garbage/>").with_filename(PRIVACY_FILENAME),
        );

        let record = PolicyCodec::validate(&msg);
        assert!(record.has_header);
        assert!(record.has_mime_part);
        assert!(!record.policy_extractable);
        assert_eq!(record.errors.len(), 2);
        assert!(record.errors[0].starts_with("Validation error: Header policy invalid:"));
        assert!(record.errors[1].starts_with("Validation error: MIME policy invalid:"));
    }

    #[test]
    fn test_attach_survives_wire_round_trip() {
        let xml = sample_xml();
        let msg = PolicyCodec::compose_with_policy("a@x.com", "b@y.com", "s", "<p>hi</p>", &xml);

        let raw = msg.to_raw().unwrap();
        let reparsed = EmailMessage::parse(&raw).unwrap();

        let extracted = PolicyCodec::extract(&reparsed).unwrap();
        assert_eq!(extracted, xml);
        let policy = PrivacyPolicy::from_xml(&extracted).unwrap();
        assert_eq!(policy.rules.len(), 1);
    }
}
