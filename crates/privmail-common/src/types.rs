//! Common types for PrivMail

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a rule within a policy.
///
/// Intended to be unique within its policy, but uniqueness is not enforced;
/// duplicate ids are evaluated independently.
pub type RuleId = String;

/// Opaque unique identifier of a privacy policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    /// Generate a fresh policy id
    pub fn generate() -> Self {
        Self(format!("policy-{}", Uuid::new_v4()))
    }

    /// Wrap an existing id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PolicyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
