//! PrivMail Core - Policy model, MIME codec, and enforcement engine
//!
//! This crate provides the declarative privacy-policy mechanism for email:
//! the policy data model and its canonical XML serialization, the message
//! normalizer, the multi-channel attachment codec, and the rule evaluation
//! engine.

pub mod codec;
pub mod enforce;
pub mod message;
pub mod policy;

pub use codec::{Channel, PolicyCodec, ValidationRecord};
pub use enforce::{Block, Enforcer, EnforcementReport, RuleTrace, StrippedElement, Warning};
pub use message::{
    DocNode, EmailMessage, Header, MarkupOutcome, MimePart, NormalizedDocument, NormalizedPart,
    PartBody,
};
pub use policy::{Action, ActionKind, Condition, CompositeOp, Phase, PrivacyPolicy, Rule};
