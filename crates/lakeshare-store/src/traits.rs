//! Repository trait: the abstract interface for share persistence.
//!
//! The reconciliation core never talks to a database directly. Everything it
//! reads or writes about shares and items goes through [`Repository`].

use async_trait::async_trait;
use lakeshare_core::{
    DatasetId, EnvironmentId, ItemHealth, ItemId, PrincipalId, ShareId, ShareItem,
    ShareItemStatus, ShareObject, ShareStatus,
};

use crate::error::Result;

/// Async interface for share and item persistence.
///
/// Every write touches exactly one status field (or one batch of them) and
/// is expected to be atomic on its own.
#[async_trait]
pub trait Repository: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Share Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new share.
    ///
    /// Fails with `Conflict` if another non-deleted share exists for the same
    /// dataset, environment and principal.
    async fn insert_share(&self, share: &ShareObject) -> Result<()>;

    async fn get_share(&self, id: &ShareId) -> Result<Option<ShareObject>>;

    /// The non-deleted share for a (dataset, environment, principal) tuple.
    async fn find_active_share(
        &self,
        dataset_id: &DatasetId,
        environment_id: &EnvironmentId,
        principal_id: &PrincipalId,
    ) -> Result<Option<ShareObject>>;

    async fn update_share_status(&self, id: &ShareId, status: ShareStatus) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Item Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_item(&self, item: &ShareItem) -> Result<()>;

    async fn get_item(&self, id: &ItemId) -> Result<Option<ShareItem>>;

    /// Items of a share, optionally only those in `status`, in insertion order.
    async fn list_items(
        &self,
        share_id: &ShareId,
        status: Option<ShareItemStatus>,
    ) -> Result<Vec<ShareItem>>;

    async fn update_item_status(&self, id: &ItemId, status: ShareItemStatus) -> Result<()>;

    /// Move every item of the share in `old` to `new`. Returns how many moved.
    async fn batch_update_item_status(
        &self,
        share_id: &ShareId,
        old: ShareItemStatus,
        new: ShareItemStatus,
    ) -> Result<usize>;

    async fn update_item_health(&self, id: &ItemId, health: &ItemHealth) -> Result<()>;

    /// Remove an item row entirely.
    async fn delete_item(&self, id: &ItemId) -> Result<()>;
}

/// Batch helpers layered on [`Repository`].
pub trait RepositoryExt: Repository {
    /// Apply a batch move, deleting the rows instead when `new` is `Deleted`.
    fn apply_item_batch(
        &self,
        share_id: &ShareId,
        old: ShareItemStatus,
        new: ShareItemStatus,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

impl<R: Repository + ?Sized> RepositoryExt for R {
    async fn apply_item_batch(
        &self,
        share_id: &ShareId,
        old: ShareItemStatus,
        new: ShareItemStatus,
    ) -> Result<usize> {
        if new != ShareItemStatus::Deleted {
            return self.batch_update_item_status(share_id, old, new).await;
        }

        let items = self.list_items(share_id, Some(old)).await?;
        for item in &items {
            self.delete_item(&item.id).await?;
        }
        Ok(items.len())
    }
}
