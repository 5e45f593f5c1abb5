//! Pre-built policy templates for common use cases

use super::model::{Action, ActionKind, Condition, PrivacyPolicy, Rule};

/// Policy to prevent email forwarding
pub fn no_forwarding(creator: &str) -> PrivacyPolicy {
    let mut policy = PrivacyPolicy::new(creator);

    policy.add_rule(
        Rule::new(
            "no-forward-1",
            Condition::xpath(".//header[@name='Received'] | .//header[@name='Resent-From']"),
            Action::new(ActionKind::Warn, "This email should not be forwarded"),
        )
        .with_description("Detect and warn on forwarding attempts"),
    );

    policy
}

/// Policy to block tracking pixels and external content
pub fn tracking_protection(creator: &str) -> PrivacyPolicy {
    let mut policy = PrivacyPolicy::new(creator);

    // Search in raw HTML text content
    policy.add_rule(
        Rule::new(
            "block-tracking-1",
            Condition::xpath(
                ".//raw-content[contains(., 'tracker.com') or contains(., 'pixel.gif') or contains(., 'analytics.com')]",
            ),
            Action::new(ActionKind::Strip, "Tracking pixel detected and removed"),
        )
        .with_description("Remove tracking pixels"),
    );

    // External image URLs in raw content
    policy.add_rule(
        Rule::new(
            "block-external-2",
            Condition::xpath(".//raw-content[contains(., 'src=\"http')]"),
            Action::new(ActionKind::Warn, "External image detected - privacy risk"),
        )
        .with_description("Warn about external images"),
    );

    // Text-based pattern matching as backup
    policy.add_rule(
        Rule::new(
            "text-tracking-3",
            Condition::mime_pattern("tracker.com|pixel.gif|analytics.com"),
            Action::new(ActionKind::Warn, "Potential tracking content detected"),
        )
        .with_description("Text-based tracking detection"),
    );

    policy
}

/// Policy to control attachment handling
pub fn attachment_control(creator: &str) -> PrivacyPolicy {
    let mut policy = PrivacyPolicy::new(creator);

    policy.add_rule(
        Rule::new(
            "block-exe-attachments-1",
            Condition::mime_pattern("application/x-msdownload|application/x-msdos-program"),
            Action::new(ActionKind::Block, "Executable attachments are not allowed"),
        )
        .with_description("Block executable attachments"),
    );

    policy
}

/// Comprehensive privacy policy combining all the major rules
pub fn strict_privacy(creator: &str) -> PrivacyPolicy {
    let mut policy = PrivacyPolicy::new(creator);

    for source in [
        no_forwarding(creator),
        tracking_protection(creator),
        attachment_control(creator),
    ] {
        for rule in source.rules {
            policy.add_rule(rule);
        }
    }

    policy
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strict_policy_combines_all_rules() {
        let policy = strict_privacy("admin@example.com");
        let ids: Vec<&str> = policy.rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "no-forward-1",
                "block-tracking-1",
                "block-external-2",
                "text-tracking-3",
                "block-exe-attachments-1",
            ]
        );
    }

    #[test]
    fn test_templates_serialize() {
        for policy in [
            no_forwarding("t"),
            tracking_protection("t"),
            attachment_control("t"),
            strict_privacy("t"),
        ] {
            let xml = policy.to_xml().unwrap();
            let parsed = PrivacyPolicy::from_xml(&xml).unwrap();
            assert_eq!(parsed.rules, policy.rules);
        }
    }
}
