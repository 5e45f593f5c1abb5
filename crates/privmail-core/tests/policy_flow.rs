//! End-to-end flow: build a policy, attach it, round-trip the message
//! through wire bytes, extract the policy, and enforce it.

use pretty_assertions::assert_eq;
use privmail_core::policy::templates;
use privmail_core::{Channel, EmailMessage, Enforcer, PolicyCodec, PrivacyPolicy};

const TRACKED_HTML: &str = "<div>\
    <img src=\"https://tracker.com/t.gif\"/>\
    <img src=\"https://cdn.example.net/pixel.gif\"/>\
    </div>";

#[test]
fn attach_transmit_extract_enforce() {
    let policy = templates::tracking_protection("sender@example.com");
    let policy_xml = policy.to_xml().unwrap();

    // Sender side: compose and attach over both channels
    let msg = PolicyCodec::compose_with_policy(
        "sender@example.com",
        "recipient@example.com",
        "weekly update",
        TRACKED_HTML,
        &policy_xml,
    );

    let validation = PolicyCodec::validate(&msg);
    assert!(validation.has_header);
    assert!(validation.has_mime_part);
    assert!(validation.policy_extractable);

    // Transmission: serialize to wire bytes and parse back
    let raw = msg.to_raw().unwrap();
    let received = EmailMessage::parse(&raw).unwrap();

    // Receiver side: recover the policy and enforce it
    let recovered_xml = PolicyCodec::extract(&received).expect("policy should be recoverable");
    let recovered = PrivacyPolicy::from_xml(&recovered_xml).unwrap();
    assert_eq!(recovered.rules, policy.rules);

    let report = Enforcer::new().enforce(&received, &recovered_xml).unwrap();

    // block-tracking-1 strips the raw-content match, text-tracking-3 warns
    assert!(report
        .actions_taken
        .contains(&"strip:block-tracking-1".to_string()));
    assert!(report
        .actions_taken
        .contains(&"warn:text-tracking-3".to_string()));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.rule == "text-tracking-3" && w.matches >= 1));
    assert!(!report.stripped_elements.is_empty());

    // The received message itself is structurally unchanged by enforcement
    let before = received.clone();
    let _ = Enforcer::new().enforce(&received, &recovered_xml).unwrap();
    assert_eq!(received, before);
}

#[test]
fn body_sentinel_only_channel() {
    let policy_xml = templates::attachment_control("a@example.com")
        .to_xml()
        .unwrap();

    let body = format!(
        "<p>report attached</p><!-- PRIVACY-POLICY-START {} PRIVACY-POLICY-END -->",
        policy_xml
    );
    let mut msg = EmailMessage::compose("a@example.com", "b@example.com", "report", &body);

    // Neither the header nor the dedicated part is present
    let validation = PolicyCodec::validate(&msg);
    assert!(!validation.has_header);
    assert!(!validation.has_mime_part);

    let extracted = PolicyCodec::extract(&msg).expect("sentinel fallback should fire");
    assert_eq!(extracted, policy_xml.trim());
    assert!(PrivacyPolicy::from_xml(&extracted).is_ok());

    // Attaching over the header channel takes priority over the sentinels
    PolicyCodec::attach(&mut msg, "header-policy", Channel::Header);
    assert_eq!(PolicyCodec::extract(&msg), Some("header-policy".to_string()));
}

#[test]
fn empty_policy_round_trip_yields_empty_report() {
    let policy = PrivacyPolicy::new("nobody@example.com");
    let policy_xml = policy.to_xml().unwrap();

    let mut msg = EmailMessage::compose("a@x.com", "b@y.com", "s", "<p>anything</p>");
    PolicyCodec::attach(&mut msg, &policy_xml, Channel::Both);

    let raw = msg.to_raw().unwrap();
    let received = EmailMessage::parse(&raw).unwrap();

    let recovered = PolicyCodec::extract(&received).unwrap();
    let report = Enforcer::new().enforce(&received, &recovered).unwrap();

    assert!(report.actions_taken.is_empty());
    assert!(report.warnings.is_empty());
    assert!(report.blocks.is_empty());
    assert!(report.stripped_elements.is_empty());
}
