//! Policy enforcement engine
//!
//! Stateless across calls: each call parses the policy, builds a fresh
//! normalized document, and returns a report owned by the caller. A single
//! rule's malformed condition is isolated to that rule; only a malformed
//! policy document fails the call.

use privmail_common::config::EnforceSettings;
use privmail_common::{Error, Result};
use regex::RegexBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::query;
use crate::message::{normalize, DocNode, EmailMessage, NormalizedDocument};
use crate::policy::{ActionKind, Condition, CompositeOp, Phase, PrivacyPolicy, Rule};

/// A rule that fired with action `warn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub rule: String,
    pub message: String,
    pub matches: usize,
}

/// A rule that fired with action `block`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub rule: String,
    pub message: String,
    pub reason: String,
}

/// A matched element reported for stripping. The engine does not mutate the
/// message; physical removal is a collaborator's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrippedElement {
    pub rule: String,
    pub snippet: String,
}

/// Structured outcome of applying a policy to a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    /// Ordered `<action>:<rule-id>` tags for every rule that fired
    pub actions_taken: Vec<String>,
    pub warnings: Vec<Warning>,
    pub blocks: Vec<Block>,
    pub stripped_elements: Vec<StrippedElement>,
}

impl EnforcementReport {
    /// True when no rule fired
    pub fn is_empty(&self) -> bool {
        self.actions_taken.is_empty()
            && self.warnings.is_empty()
            && self.blocks.is_empty()
            && self.stripped_elements.is_empty()
    }
}

/// Per-rule evaluation record passed to the trace callback
#[derive(Debug, Clone)]
pub struct RuleTrace<'a> {
    pub rule_id: &'a str,
    pub action: ActionKind,
    /// Rule was skipped because its scope does not match the evaluated phase
    pub skipped: bool,
    pub match_count: usize,
    pub error: Option<String>,
}

type TraceFn = dyn Fn(&RuleTrace<'_>) + Send + Sync;

/// Enforces privacy policies on messages
pub struct Enforcer {
    settings: EnforceSettings,
    trace: Option<Box<TraceFn>>,
}

impl Default for Enforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl Enforcer {
    /// Create an enforcer with default settings
    pub fn new() -> Self {
        Self::with_settings(EnforceSettings::default())
    }

    /// Create an enforcer with explicit settings
    pub fn with_settings(settings: EnforceSettings) -> Self {
        Self {
            settings,
            trace: None,
        }
    }

    /// Register a structured trace callback invoked once per rule evaluated
    pub fn with_trace(mut self, trace: impl Fn(&RuleTrace<'_>) + Send + Sync + 'static) -> Self {
        self.trace = Some(Box::new(trace));
        self
    }

    /// Enforce a serialized policy on a message for the at-use phase
    pub fn enforce(&self, msg: &EmailMessage, policy_xml: &str) -> Result<EnforcementReport> {
        self.enforce_phase(msg, policy_xml, Phase::AtUse)
    }

    /// Enforce a serialized policy on a message for one lifecycle phase.
    ///
    /// Rules scoped to other phases are inert; invoking them at the correct
    /// lifecycle point is the caller's responsibility.
    pub fn enforce_phase(
        &self,
        msg: &EmailMessage,
        policy_xml: &str,
        phase: Phase,
    ) -> Result<EnforcementReport> {
        let policy = PrivacyPolicy::from_xml(policy_xml)?;
        let doc = normalize(msg);

        let mut report = EnforcementReport::default();

        for rule in &policy.rules {
            if rule.scope != phase {
                self.emit_trace(rule, true, 0, None);
                continue;
            }

            let matches = match self.eval_condition(&rule.condition, &doc) {
                Ok(matches) => matches,
                Err(e) => {
                    // Isolated to this rule; it is treated as non-matching
                    warn!("Condition error in rule {}: {}", rule.rule_id, e);
                    self.emit_trace(rule, false, 0, Some(e.to_string()));
                    continue;
                }
            };

            self.emit_trace(rule, false, matches.len(), None);

            if matches.is_empty() {
                continue;
            }

            info!(
                "Rule '{}' matched {} nodes, executing action {}",
                rule.rule_id,
                matches.len(),
                rule.action.kind.as_str()
            );
            self.execute_action(rule, &matches, &mut report);
        }

        Ok(report)
    }

    /// Evaluate a condition against the normalized document, returning a
    /// length-capped excerpt per matched node
    fn eval_condition(&self, condition: &Condition, doc: &NormalizedDocument) -> Result<Vec<String>> {
        match condition {
            Condition::XPath(expr) => {
                let nodes = query::evaluate(expr, &doc.root)?;
                Ok(nodes
                    .into_iter()
                    .map(|node| node_excerpt(node, self.settings.excerpt_max_len))
                    .collect())
            }
            Condition::MimePattern(pattern) => {
                let re = RegexBuilder::new(pattern)
                    .size_limit(self.settings.regex_size_limit)
                    .build()
                    .map_err(|e| Error::Query(format!("Invalid pattern '{}': {}", pattern, e)))?;

                let mut matches = Vec::new();
                for part in &doc.parts {
                    if re.is_match(&part.content_type) {
                        matches.push(truncate(&part.content_type, self.settings.excerpt_max_len));
                    } else if let Some(text) = part.body.text() {
                        if let Some(found) = re.find(text) {
                            matches.push(truncate(found.as_str(), self.settings.excerpt_max_len));
                        }
                    }
                }
                Ok(matches)
            }
            Condition::Composite {
                operator,
                conditions,
            } => self.eval_composite(*operator, conditions, doc),
        }
    }

    fn eval_composite(
        &self,
        operator: CompositeOp,
        conditions: &[Condition],
        doc: &NormalizedDocument,
    ) -> Result<Vec<String>> {
        match operator {
            CompositeOp::And => {
                let mut all = Vec::new();
                for condition in conditions {
                    let matches = self.eval_condition(condition, doc)?;
                    if matches.is_empty() {
                        return Ok(Vec::new());
                    }
                    all.extend(matches);
                }
                Ok(all)
            }
            CompositeOp::Or => {
                for condition in conditions {
                    let matches = self.eval_condition(condition, doc)?;
                    if !matches.is_empty() {
                        return Ok(matches);
                    }
                }
                Ok(Vec::new())
            }
            CompositeOp::Not => {
                for condition in conditions {
                    if !self.eval_condition(condition, doc)?.is_empty() {
                        return Ok(Vec::new());
                    }
                }
                // Negation matched: the whole document is the matched node
                Ok(vec!["<email>".to_string()])
            }
        }
    }

    fn execute_action(&self, rule: &Rule, matches: &[String], report: &mut EnforcementReport) {
        let message = rule.action.message.clone().unwrap_or_default();

        match rule.action.kind {
            ActionKind::Allow => {
                report.actions_taken.push(format!("allow:{}", rule.rule_id));
            }
            ActionKind::Warn => {
                report.warnings.push(Warning {
                    rule: rule.rule_id.clone(),
                    message,
                    matches: matches.len(),
                });
                report.actions_taken.push(format!("warn:{}", rule.rule_id));
            }
            ActionKind::Strip => {
                for excerpt in matches {
                    report.stripped_elements.push(StrippedElement {
                        rule: rule.rule_id.clone(),
                        snippet: truncate(excerpt, self.settings.snippet_max_len),
                    });
                }
                report.actions_taken.push(format!("strip:{}", rule.rule_id));
            }
            ActionKind::Block => {
                report.blocks.push(Block {
                    rule: rule.rule_id.clone(),
                    message,
                    reason: "Policy violation".to_string(),
                });
                report.actions_taken.push(format!("block:{}", rule.rule_id));
            }
            ActionKind::Encrypt | ActionKind::Log => {
                // Declared in the vocabulary with no defined effect
                debug!(
                    "Rule '{}' requested no-op action {}",
                    rule.rule_id,
                    rule.action.kind.as_str()
                );
            }
        }
    }

    fn emit_trace(&self, rule: &Rule, skipped: bool, match_count: usize, error: Option<String>) {
        if let Some(trace) = &self.trace {
            trace(&RuleTrace {
                rule_id: &rule.rule_id,
                action: rule.action.kind,
                skipped,
                match_count,
                error,
            });
        }
    }
}

/// Pseudo-markup rendering of a matched node, capped in length
fn node_excerpt(node: &DocNode, max_len: usize) -> String {
    let mut out = format!("<{}", node.name);
    for (name, value) in &node.attrs {
        out.push_str(&format!(" {}=\"{}\"", name, value));
    }
    out.push('>');
    out.push_str(&node.string_value());
    truncate(&out, max_len)
}

fn truncate(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}
