//! Error types for policy reconciliation.

use thiserror::Error;

/// A cloud API call failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct CloudError {
    /// The API operation, e.g. `iam:GetPolicy`.
    pub operation: String,
    pub message: String,
}

impl CloudError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur while granting or revoking access.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Transient or permanent failure of a cloud call.
    #[error("cloud operation failed: {0}")]
    Cloud(#[from] CloudError),

    /// The role would need more managed policies than it may hold.
    #[error(
        "role {role} needs {needed} share policies but only {available} of its quota of {quota} are free"
    )]
    QuotaExceeded {
        role: String,
        needed: usize,
        available: usize,
        quota: usize,
    },

    /// The principal's role does not exist.
    #[error("principal role not found: {0}")]
    PrincipalNotFound(String),

    /// A resource the grant depends on is missing.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Core error (malformed or oversized policy).
    #[error("core error: {0}")]
    Core(#[from] lakeshare_core::CoreError),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
