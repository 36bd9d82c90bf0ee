//! Error types for lakeshare core.

use thiserror::Error;

/// Errors raised by the pure share and policy primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The action cannot be applied to an entity in the given state.
    #[error("transition {action} is not allowed from state {state} (targets: {})", targets.join(", "))]
    IllegalTransition {
        action: String,
        state: String,
        targets: Vec<String>,
    },

    /// A status or kind string did not name a known value.
    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    /// A policy document could not be encoded or decoded.
    #[error("malformed policy: {0}")]
    MalformedPolicy(String),

    /// A single statement is larger than a whole document may be.
    #[error("statement {sid} is {size} bytes, exceeding the document limit of {limit}")]
    StatementTooLarge { sid: String, size: usize, limit: usize },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
