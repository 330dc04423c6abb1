//! Error types for the rules crate

use thiserror::Error;

/// Result type alias for rule engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to the caller.
///
/// Most problems inside rule evaluation are deliberately not errors: they are
/// logged once at load time and degrade to a value that never matches.
#[derive(Debug, Error)]
pub enum Error {
    /// Trigger kind name that is not recognized
    #[error("Unknown trigger kind: {0}")]
    UnknownTrigger(String),

    /// Rule with this ID already exists
    #[error("Rule already exists: {0}")]
    DuplicateRule(String),

    /// Rule not found
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Rule record that cannot be compiled
    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// RPC arguments could not be encoded
    #[error("RPC encoding error: {0}")]
    Rpc(#[from] bincode::Error),

    /// Container contents could not be encoded or decoded
    #[error("Item encoding error: {0}")]
    Items(String),
}
