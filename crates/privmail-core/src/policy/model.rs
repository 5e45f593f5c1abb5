//! Policy data model
//!
//! A policy is built once, serialized, and becomes immutable once attached
//! to a message. Conditions and actions are closed variants so unrecognized
//! tags fail at parse time instead of being silently ignored.

use chrono::{DateTime, Utc};
use privmail_common::types::{PolicyId, RuleId};
use serde::{Deserialize, Serialize};

/// Lifecycle phase a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    AtRest,
    InTransit,
    AtUse,
}

impl Phase {
    /// Wire form of the phase, as written in `Scope/@phase`
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AtRest => "at-rest",
            Phase::InTransit => "in-transit",
            Phase::AtUse => "at-use",
        }
    }

    /// Parse the wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "at-rest" => Some(Phase::AtRest),
            "in-transit" => Some(Phase::InTransit),
            "at-use" => Some(Phase::AtUse),
            _ => None,
        }
    }
}

/// What a rule does when its condition matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Allow,
    Warn,
    Strip,
    Block,
    /// Declared in the vocabulary with no defined effect; an explicit no-op
    Encrypt,
    /// Declared in the vocabulary with no defined effect; an explicit no-op
    Log,
}

impl ActionKind {
    /// Wire form of the action type, as written in `Action/@type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Allow => "allow",
            ActionKind::Warn => "warn",
            ActionKind::Strip => "strip",
            ActionKind::Block => "block",
            ActionKind::Encrypt => "encrypt",
            ActionKind::Log => "log",
        }
    }

    /// Parse the wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(ActionKind::Allow),
            "warn" => Some(ActionKind::Warn),
            "strip" => Some(ActionKind::Strip),
            "block" => Some(ActionKind::Block),
            "encrypt" => Some(ActionKind::Encrypt),
            "log" => Some(ActionKind::Log),
            _ => None,
        }
    }
}

/// Action taken when a rule's condition matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Human-readable message carried into reports
    pub message: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn bare(kind: ActionKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

/// Operator joining the sub-conditions of a composite condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeOp {
    And,
    Or,
    Not,
}

impl CompositeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeOp::And => "and",
            CompositeOp::Or => "or",
            CompositeOp::Not => "not",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "and" => Some(CompositeOp::And),
            "or" => Some(CompositeOp::Or),
            "not" => Some(CompositeOp::Not),
            _ => None,
        }
    }
}

/// Rule condition. Exactly one variant is populated, enforced by the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Path-query string evaluated against the normalized document tree
    XPath(String),
    /// Regex pattern matched against part content-type or decoded text
    MimePattern(String),
    /// Recursive combination of sub-conditions
    Composite {
        operator: CompositeOp,
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Condition::XPath(expr.into())
    }

    pub fn mime_pattern(pattern: impl Into<String>) -> Self {
        Condition::MimePattern(pattern.into())
    }

    pub fn composite(operator: CompositeOp, conditions: Vec<Condition>) -> Self {
        Condition::Composite {
            operator,
            conditions,
        }
    }
}

/// A single policy rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: RuleId,
    pub condition: Condition,
    pub action: Action,
    pub description: Option<String>,
    /// Carried and preserved, but evaluation follows declaration order
    pub priority: i32,
    pub scope: Phase,
}

impl Rule {
    /// Create a rule with default priority and at-use scope
    pub fn new(rule_id: impl Into<String>, condition: Condition, action: Action) -> Self {
        Self {
            rule_id: rule_id.into(),
            condition,
            action,
            description: None,
            priority: 1,
            scope: Phase::AtUse,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the scope phase
    pub fn with_scope(mut self, scope: Phase) -> Self {
        self.scope = scope;
        self
    }
}

/// Declarative privacy policy: identity metadata plus an ordered rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyPolicy {
    pub policy_id: PolicyId,
    pub version: String,
    pub creator: String,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub rules: Vec<Rule>,
}

impl PrivacyPolicy {
    /// Create an empty policy with a generated id
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            policy_id: PolicyId::generate(),
            version: "1.0".to_string(),
            creator: creator.into(),
            created: Utc::now(),
            expires: None,
            rules: Vec::new(),
        }
    }

    /// Append a rule. Duplicate rule ids are legal and evaluated
    /// independently.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Set the expiry timestamp
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }
}
