//! Error types for PrivMail

use thiserror::Error;

/// Main error type for PrivMail
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed top-level policy document. Fatal to the enforcement call
    /// that encountered it.
    #[error("Policy format error: {0}")]
    PolicyFormat(String),

    /// Malformed or unsupported condition expression in a single rule.
    /// Recovered locally; the rule is treated as non-matching.
    #[error("Query error: {0}")]
    Query(String),

    /// Header or part payload not decodable. Isolated to its channel.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PrivMail
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::PolicyFormat(_) => "POLICY_FORMAT_ERROR",
            Error::Query(_) => "QUERY_ERROR",
            Error::Decode(_) => "DECODE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the engine recovers from this error locally rather than
    /// failing the whole call. Only a malformed policy document is fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::PolicyFormat(_))
    }
}
