//! Policy Document Model
//!
//! The declarative privacy-policy data model and its canonical XML
//! serialization, plus pre-built policy templates for common use cases.

mod model;
pub mod templates;
mod xml;

pub use model::{Action, ActionKind, Condition, CompositeOp, Phase, PrivacyPolicy, Rule};
pub use xml::POLICY_NAMESPACE;
