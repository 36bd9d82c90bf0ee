//! Repository errors.

use lakeshare_core::CoreError;
use thiserror::Error;

/// Failure of a [`Repository`](crate::Repository) call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected a statement.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Share or item not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A second active share for the same dataset, environment and principal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row no longer parses into a domain value.
    #[error("invalid data: {0}")]
    InvalidData(#[from] CoreError),

    /// The on-disk schema cannot be brought to the current version.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding in-process state was poisoned.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// The blocking task running a query failed.
    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
