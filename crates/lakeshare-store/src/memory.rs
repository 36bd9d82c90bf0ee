//! Map-backed [`Repository`](crate::Repository) used by tests and fixtures.
//!
//! Enforces the same one-live-share rule as the SQLite schema.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use lakeshare_core::{
    now_millis, DatasetId, EnvironmentId, ItemHealth, ItemId, PrincipalId, ShareId, ShareItem,
    ShareItemStatus, ShareObject, ShareStatus,
};

use crate::error::{Result, StoreError};
use crate::traits::Repository;

/// Shares and items held in `RwLock`ed maps.
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    shares: HashMap<ShareId, ShareObject>,
    items: HashMap<ItemId, ShareItem>,
    /// Insertion sequence per item; `list_items` orders by it.
    sequence: HashMap<ItemId, u64>,
    next_sequence: u64,
}

impl MemoryRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn active_share(
        &self,
        dataset_id: &DatasetId,
        environment_id: &EnvironmentId,
        principal_id: &PrincipalId,
    ) -> Option<&ShareObject> {
        self.shares.values().find(|s| {
            s.is_active()
                && &s.dataset_id == dataset_id
                && &s.environment_id == environment_id
                && &s.principal.id == principal_id
        })
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_share(&self, share: &ShareObject) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(existing) =
            inner.active_share(&share.dataset_id, &share.environment_id, &share.principal.id)
        {
            return Err(StoreError::Conflict(format!(
                "share {} already covers dataset {} for principal {}",
                existing.id, share.dataset_id, share.principal.id
            )));
        }
        inner.shares.insert(share.id.clone(), share.clone());
        Ok(())
    }

    async fn get_share(&self, id: &ShareId) -> Result<Option<ShareObject>> {
        Ok(self.read()?.shares.get(id).cloned())
    }

    async fn find_active_share(
        &self,
        dataset_id: &DatasetId,
        environment_id: &EnvironmentId,
        principal_id: &PrincipalId,
    ) -> Result<Option<ShareObject>> {
        Ok(self
            .read()?
            .active_share(dataset_id, environment_id, principal_id)
            .cloned())
    }

    async fn update_share_status(&self, id: &ShareId, status: ShareStatus) -> Result<()> {
        let mut inner = self.write()?;
        let share = inner
            .shares
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("share {}", id)))?;
        share.status = status;
        share.updated_at = now_millis();
        Ok(())
    }

    async fn insert_item(&self, item: &ShareItem) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.shares.contains_key(&item.share_id) {
            return Err(StoreError::NotFound(format!("share {}", item.share_id)));
        }
        if !inner.sequence.contains_key(&item.id) {
            let next = inner.next_sequence;
            inner.sequence.insert(item.id.clone(), next);
            inner.next_sequence += 1;
        }
        inner.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<ShareItem>> {
        Ok(self.read()?.items.get(id).cloned())
    }

    async fn list_items(
        &self,
        share_id: &ShareId,
        status: Option<ShareItemStatus>,
    ) -> Result<Vec<ShareItem>> {
        let inner = self.read()?;
        let mut items: Vec<ShareItem> = inner
            .items
            .values()
            .filter(|i| &i.share_id == share_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        items.sort_by_key(|i| inner.sequence.get(&i.id).copied());
        Ok(items)
    }

    async fn update_item_status(&self, id: &ItemId, status: ShareItemStatus) -> Result<()> {
        let mut inner = self.write()?;
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("item {}", id)))?;
        item.status = status;
        item.updated_at = now_millis();
        Ok(())
    }

    async fn batch_update_item_status(
        &self,
        share_id: &ShareId,
        old: ShareItemStatus,
        new: ShareItemStatus,
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let now = now_millis();
        let mut moved = 0;
        for item in inner.items.values_mut() {
            if &item.share_id == share_id && item.status == old {
                item.status = new;
                item.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn update_item_health(&self, id: &ItemId, health: &ItemHealth) -> Result<()> {
        let mut inner = self.write()?;
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("item {}", id)))?;
        item.health = health.clone();
        Ok(())
    }

    async fn delete_item(&self, id: &ItemId) -> Result<()> {
        let mut inner = self.write()?;
        inner.items.remove(id);
        inner.sequence.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RepositoryExt;
    use lakeshare_core::{ItemKind, PrincipalKind, SharePrincipal};

    fn share(principal: &str) -> ShareObject {
        ShareObject::new(
            DatasetId::new("ds"),
            EnvironmentId::new("env"),
            SharePrincipal::new(principal, PrincipalKind::ConsumptionRole, "role"),
            "owner",
        )
    }

    #[tokio::test]
    async fn test_memory_repository_basic() {
        let repo = MemoryRepository::new();
        let share = share("p1");
        repo.insert_share(&share).await.unwrap();

        let item = ShareItem::new(share.id.clone(), "tbl", ItemKind::Table);
        repo.insert_item(&item).await.unwrap();

        let loaded = repo.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ShareItemStatus::PendingApproval);

        repo.update_share_status(&share.id, ShareStatus::Submitted).await.unwrap();
        assert_eq!(
            repo.get_share(&share.id).await.unwrap().unwrap().status,
            ShareStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_one_active_share_per_tuple() {
        let repo = MemoryRepository::new();
        let first = share("p1");
        repo.insert_share(&first).await.unwrap();
        assert!(matches!(
            repo.insert_share(&share("p1")).await,
            Err(StoreError::Conflict(_))
        ));

        repo.update_share_status(&first.id, ShareStatus::Deleted).await.unwrap();
        repo.insert_share(&share("p1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_update_and_delete() {
        let repo = MemoryRepository::new();
        let share = share("p1");
        repo.insert_share(&share).await.unwrap();
        for name in ["a", "b", "c"] {
            repo.insert_item(&ShareItem::new(share.id.clone(), name, ItemKind::Table))
                .await
                .unwrap();
        }

        let moved = repo
            .batch_update_item_status(
                &share.id,
                ShareItemStatus::PendingApproval,
                ShareItemStatus::ShareApproved,
            )
            .await
            .unwrap();
        assert_eq!(moved, 3);

        let deleted = repo
            .apply_item_batch(&share.id, ShareItemStatus::ShareApproved, ShareItemStatus::Deleted)
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert!(repo.list_items(&share.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let repo = MemoryRepository::new();
        assert!(repo.get_share(&ShareId::new("nope")).await.unwrap().is_none());
        assert!(matches!(
            repo.update_item_status(&ItemId::new("nope"), ShareItemStatus::Deleted).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_items_listed_in_insertion_order() {
        let repo = MemoryRepository::new();
        let share = share("p1");
        repo.insert_share(&share).await.unwrap();
        let names = ["raw", "bucket", "orders", "curated", "archive"];
        for name in names {
            let mut item = ShareItem::new(share.id.clone(), name, ItemKind::Table);
            item.created_at = 1_000;
            repo.insert_item(&item).await.unwrap();
        }

        let listed: Vec<String> = repo
            .list_items(&share.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.resource.id.as_str().to_string())
            .collect();
        assert_eq!(listed, names);
    }
}
