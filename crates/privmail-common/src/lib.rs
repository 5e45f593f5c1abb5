//! PrivMail Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, settings, and identifier types
//! shared across all PrivMail components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::{Error, Result};
pub use types::{PolicyId, RuleId};
