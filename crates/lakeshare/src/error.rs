//! Error types for the share engine.

use lakeshare_core::{CoreError, ItemId, ItemKind, ResourceId, ShareId};
use lakeshare_policy::PolicyError;
use lakeshare_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Illegal transition or malformed policy.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Granting, revoking or checking failed.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("share not found: {0}")]
    ShareNotFound(ShareId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// The item exists but belongs to another share.
    #[error("item {item} does not belong to share {share}")]
    ItemNotInShare { share: ShareId, item: ItemId },

    /// The resource is already an item of the share.
    #[error("resource {0} is already part of the share")]
    DuplicateItem(ResourceId),

    /// The share cannot be deleted while items are shared.
    #[error("share {share} still has {count} shared items")]
    ItemsStillShared { share: ShareId, count: usize },

    /// The dataset or principal lock could not be acquired in time.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// No manager handles items of this kind.
    #[error("no share manager for {0} items")]
    UnsupportedItem(ItemKind),

    /// A caller-supplied resolver failed.
    #[error("resolver error: {0}")]
    Resolver(#[from] anyhow::Error),
}

/// Coarse classification of a [`ShareError`], for picking retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller bug; never retried.
    IllegalTransition,
    /// Policy limits reached; the item is failed and needs intervention.
    QuotaExceeded,
    /// Transient cloud failure; retry later.
    CloudOperationFailed,
    NotFound,
    Lock,
    Other,
}

impl ShareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShareError::Core(CoreError::IllegalTransition { .. }) => ErrorKind::IllegalTransition,
            ShareError::ItemsStillShared { .. } => ErrorKind::IllegalTransition,
            ShareError::Policy(PolicyError::QuotaExceeded { .. }) => ErrorKind::QuotaExceeded,
            ShareError::Policy(PolicyError::Cloud(_)) => ErrorKind::CloudOperationFailed,
            ShareError::Policy(PolicyError::PrincipalNotFound(_))
            | ShareError::Policy(PolicyError::ResourceNotFound(_))
            | ShareError::Store(StoreError::NotFound(_))
            | ShareError::ShareNotFound(_)
            | ShareError::ItemNotFound(_)
            | ShareError::ItemNotInShare { .. } => ErrorKind::NotFound,
            ShareError::LockUnavailable(_) => ErrorKind::Lock,
            _ => ErrorKind::Other,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ShareError>;
