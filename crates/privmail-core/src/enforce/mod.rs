//! Rule Evaluation Engine
//!
//! Parses a policy, normalizes a message, evaluates each rule against the
//! document tree, and aggregates a structured enforcement report.

mod engine;
pub mod query;

pub use engine::{Block, Enforcer, EnforcementReport, RuleTrace, StrippedElement, Warning};
