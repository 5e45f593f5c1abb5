//! Canonical XML serialization of privacy policies
//!
//! Wire grammar (namespace `urn:email:privacy:1.0`):
//!
//! ```text
//! PrivacyPolicy{version, xmlns}
//!   Metadata{ Creator, Created, Expires? }
//!   Rules{ Rule{id, priority}* }
//!     Description?
//!     Condition{ XPath | MIMEPattern | Composite{operator} }
//!     Action{type, message?}
//!     Scope{phase}
//! ```
//!
//! Parsing matches on local names so prefixed documents are accepted.
//! Unknown action types, scope phases, and composite operators are rejected
//! at parse time.

use chrono::{DateTime, NaiveDateTime, Utc};
use privmail_common::types::PolicyId;
use privmail_common::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::model::{Action, ActionKind, Condition, CompositeOp, Phase, PrivacyPolicy, Rule};

/// Namespace of the canonical policy document
pub const POLICY_NAMESPACE: &str = "urn:email:privacy:1.0";

impl PrivacyPolicy {
    /// Serialize to the canonical XML form
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut root = BytesStart::new("PrivacyPolicy");
        root.push_attribute(("version", self.version.as_str()));
        root.push_attribute(("xmlns", POLICY_NAMESPACE));
        write_start(&mut writer, root)?;

        write_start(&mut writer, BytesStart::new("Metadata"))?;
        write_text_element(&mut writer, "Creator", &self.creator)?;
        write_text_element(&mut writer, "Created", &self.created.to_rfc3339())?;
        if let Some(expires) = &self.expires {
            write_text_element(&mut writer, "Expires", &expires.to_rfc3339())?;
        }
        write_end(&mut writer, "Metadata")?;

        write_start(&mut writer, BytesStart::new("Rules"))?;
        for rule in &self.rules {
            write_rule(&mut writer, rule)?;
        }
        write_end(&mut writer, "Rules")?;

        write_end(&mut writer, "PrivacyPolicy")?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Internal(format!("Policy serialization produced invalid UTF-8: {}", e)))
    }

    /// Parse a policy from its canonical XML form.
    ///
    /// The wire document carries no policy id, so a fresh one is assigned;
    /// the round-trip contract covers the rule set, not the id.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let root = read_tree(xml)?;
        if root.name != "PrivacyPolicy" {
            return Err(Error::PolicyFormat(format!(
                "Expected PrivacyPolicy root element, found {}",
                root.name
            )));
        }

        let version = root
            .attr("version")
            .map(str::to_string)
            .unwrap_or_else(|| "1.0".to_string());

        let metadata = root.child("Metadata");
        let creator = metadata
            .and_then(|m| m.child("Creator"))
            .map(|c| c.text.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let created = metadata
            .and_then(|m| m.child("Created"))
            .and_then(|c| parse_timestamp(c.text.trim()))
            .unwrap_or_else(Utc::now);
        let expires = metadata
            .and_then(|m| m.child("Expires"))
            .and_then(|c| parse_timestamp(c.text.trim()));

        let mut rules = Vec::new();
        if let Some(rules_elem) = root.child("Rules") {
            for rule_elem in rules_elem.children.iter().filter(|c| c.name == "Rule") {
                rules.push(parse_rule(rule_elem)?);
            }
        }

        Ok(PrivacyPolicy {
            policy_id: PolicyId::generate(),
            version,
            creator,
            created,
            expires,
            rules,
        })
    }
}

fn write_rule(writer: &mut Writer<Vec<u8>>, rule: &Rule) -> Result<()> {
    let mut start = BytesStart::new("Rule");
    start.push_attribute(("id", rule.rule_id.as_str()));
    let priority = rule.priority.to_string();
    start.push_attribute(("priority", priority.as_str()));
    write_start(writer, start)?;

    if let Some(description) = &rule.description {
        write_text_element(writer, "Description", description)?;
    }

    write_condition(writer, &rule.condition)?;

    let mut action = BytesStart::new("Action");
    action.push_attribute(("type", rule.action.kind.as_str()));
    if let Some(message) = &rule.action.message {
        action.push_attribute(("message", message.as_str()));
    }
    write_empty(writer, action)?;

    let mut scope = BytesStart::new("Scope");
    scope.push_attribute(("phase", rule.scope.as_str()));
    write_empty(writer, scope)?;

    write_end(writer, "Rule")
}

fn write_condition(writer: &mut Writer<Vec<u8>>, condition: &Condition) -> Result<()> {
    write_start(writer, BytesStart::new("Condition"))?;
    match condition {
        Condition::XPath(expr) => write_text_element(writer, "XPath", expr)?,
        Condition::MimePattern(pattern) => write_text_element(writer, "MIMEPattern", pattern)?,
        Condition::Composite {
            operator,
            conditions,
        } => {
            let mut composite = BytesStart::new("Composite");
            composite.push_attribute(("operator", operator.as_str()));
            write_start(writer, composite)?;
            for sub in conditions {
                write_condition(writer, sub)?;
            }
            write_end(writer, "Composite")?;
        }
    }
    write_end(writer, "Condition")
}

fn parse_rule(elem: &XmlElem) -> Result<Rule> {
    let rule_id = elem
        .attr("id")
        .map(str::to_string)
        .ok_or_else(|| Error::PolicyFormat("Rule is missing an id attribute".to_string()))?;

    let priority = elem
        .attr("priority")
        .and_then(|p| p.parse::<i32>().ok())
        .unwrap_or(1);

    let description = elem
        .child("Description")
        .map(|d| d.text.trim().to_string())
        .filter(|s| !s.is_empty());

    let condition_elem = elem.child("Condition").ok_or_else(|| {
        Error::PolicyFormat(format!("Rule '{}' is missing a Condition", rule_id))
    })?;
    let condition = parse_condition(condition_elem, &rule_id)?;

    let action_elem = elem
        .child("Action")
        .ok_or_else(|| Error::PolicyFormat(format!("Rule '{}' is missing an Action", rule_id)))?;
    let kind_str = action_elem.attr("type").ok_or_else(|| {
        Error::PolicyFormat(format!("Rule '{}' has an Action without a type", rule_id))
    })?;
    let kind = ActionKind::parse(kind_str).ok_or_else(|| {
        Error::PolicyFormat(format!(
            "Rule '{}' has unrecognized action type '{}'",
            rule_id, kind_str
        ))
    })?;
    let action = Action {
        kind,
        message: action_elem.attr("message").map(str::to_string),
    };

    let scope = match elem.child("Scope").and_then(|s| s.attr("phase")) {
        Some(phase_str) => Phase::parse(phase_str).ok_or_else(|| {
            Error::PolicyFormat(format!(
                "Rule '{}' has unrecognized scope phase '{}'",
                rule_id, phase_str
            ))
        })?,
        None => Phase::AtUse,
    };

    Ok(Rule {
        rule_id,
        condition,
        action,
        description,
        priority,
        scope,
    })
}

fn parse_condition(elem: &XmlElem, rule_id: &str) -> Result<Condition> {
    let mut variants = Vec::new();
    for child in &elem.children {
        match child.name.as_str() {
            "XPath" => variants.push(Condition::XPath(child.text.trim().to_string())),
            "MIMEPattern" => {
                variants.push(Condition::MimePattern(child.text.trim().to_string()))
            }
            "Composite" => {
                let operator = match child.attr("operator") {
                    Some(op) => CompositeOp::parse(op).ok_or_else(|| {
                        Error::PolicyFormat(format!(
                            "Rule '{}' has unrecognized composite operator '{}'",
                            rule_id, op
                        ))
                    })?,
                    None => CompositeOp::And,
                };
                let mut conditions = Vec::new();
                for sub in child.children.iter().filter(|c| c.name == "Condition") {
                    conditions.push(parse_condition(sub, rule_id)?);
                }
                variants.push(Condition::Composite {
                    operator,
                    conditions,
                });
            }
            _ => {
                return Err(Error::PolicyFormat(format!(
                    "Rule '{}' has unrecognized condition element '{}'",
                    rule_id, child.name
                )))
            }
        }
    }

    match variants.len() {
        1 => Ok(variants.into_iter().next().unwrap()),
        0 => Err(Error::PolicyFormat(format!(
            "Rule '{}' has an empty Condition",
            rule_id
        ))),
        n => Err(Error::PolicyFormat(format!(
            "Rule '{}' has {} condition variants, expected exactly one",
            rule_id, n
        ))),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive ISO-8601 timestamps without an offset
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn write_start(writer: &mut Writer<Vec<u8>>, start: BytesStart<'_>) -> Result<()> {
    writer
        .write_event(Event::Start(start))
        .map_err(|e| Error::Internal(format!("XML write error: {}", e)))
}

fn write_end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| Error::Internal(format!("XML write error: {}", e)))
}

fn write_empty(writer: &mut Writer<Vec<u8>>, start: BytesStart<'_>) -> Result<()> {
    writer
        .write_event(Event::Empty(start))
        .map_err(|e| Error::Internal(format!("XML write error: {}", e)))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    write_start(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| Error::Internal(format!("XML write error: {}", e)))?;
    write_end(writer, name)
}

/// Generic element tree used as an intermediate parse representation
struct XmlElem {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlElem>,
}

impl XmlElem {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlElem> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Read a whole document into an element tree, keyed by local names
fn read_tree(xml: &str) -> Result<XmlElem> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElem> = Vec::new();
    let mut root: Option<XmlElem> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| Error::PolicyFormat(format!("XML parse error: {}", e)))?
        {
            Event::Start(start) => {
                stack.push(elem_from_start(&start)?);
            }
            Event::Empty(start) => {
                let elem = elem_from_start(&start)?;
                attach(&mut stack, &mut root, elem)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| Error::PolicyFormat(format!("XML parse error: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&value);
                }
            }
            Event::End(_) => {
                let elem = stack
                    .pop()
                    .ok_or_else(|| Error::PolicyFormat("Unbalanced XML document".to_string()))?;
                attach(&mut stack, &mut root, elem)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::PolicyFormat("Unbalanced XML document".to_string()));
    }

    root.ok_or_else(|| Error::PolicyFormat("Empty policy document".to_string()))
}

fn elem_from_start(start: &BytesStart<'_>) -> Result<XmlElem> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::PolicyFormat(format!("XML attribute error: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::PolicyFormat(format!("XML attribute error: {}", e)))?
            .to_string();
        attrs.push((key, value));
    }
    Ok(XmlElem {
        name,
        attrs,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(stack: &mut [XmlElem], root: &mut Option<XmlElem>, elem: XmlElem) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(elem);
        Ok(())
    } else if root.is_none() {
        *root = Some(elem);
        Ok(())
    } else {
        Err(Error::PolicyFormat(
            "Multiple root elements in policy document".to_string(),
        ))
    }
}
