//! The ShareEngine: drives both state machines and the share managers.
//!
//! Request-side operations (`create_share`, `add_item`, `apply`, ...) only
//! move statuses. Worker-side operations (`process_approved`,
//! `process_revoked`, `verify_share`, `reapply_share`) talk to the cloud
//! through the [`ManagerRegistry`] while holding the share's locks.

use std::sync::Arc;

use lakeshare_core::{
    now_millis, DatasetId, EnvironmentId, HealthStatus, ItemHealth, ItemId, ItemKind,
    ResourceId, ShareAction, ShareId, ShareItem, ShareItemAction, ShareItemStatus, ShareObject,
    SharePrincipal, ShareStatus,
};
use lakeshare_policy::{health_from_findings, Finding, HealthVerifier, ShareManager};
use lakeshare_store::{Repository, RepositoryExt};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{Result, ShareError};
use crate::lock::{share_lock_resources, LockGuard, LockProvider};
use crate::registry::ManagerRegistry;

/// Outcome of one worker run over a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub share_id: ShareId,
    /// Share status after the run.
    pub status: ShareStatus,
    pub succeeded: Vec<ItemId>,
    /// Failed items and the error that failed them.
    pub failed: Vec<(ItemId, String)>,
}

impl ProcessReport {
    fn new(share_id: ShareId, status: ShareStatus) -> Self {
        Self {
            share_id,
            status,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Which way a worker run moves access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Grant,
    Revoke,
}

pub struct ShareEngine<R: Repository> {
    repo: Arc<R>,
    registry: Arc<dyn ManagerRegistry>,
    locks: Arc<dyn LockProvider>,
    config: EngineConfig,
}

impl<R: Repository> ShareEngine<R> {
    pub fn new(
        repo: Arc<R>,
        registry: Arc<dyn ManagerRegistry>,
        locks: Arc<dyn LockProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo,
            registry,
            locks,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn share(&self, id: &ShareId) -> Result<ShareObject> {
        self.repo
            .get_share(id)
            .await?
            .ok_or_else(|| ShareError::ShareNotFound(id.clone()))
    }

    pub async fn item(&self, id: &ItemId) -> Result<ShareItem> {
        self.repo
            .get_item(id)
            .await?
            .ok_or_else(|| ShareError::ItemNotFound(id.clone()))
    }

    pub async fn items(&self, share_id: &ShareId) -> Result<Vec<ShareItem>> {
        Ok(self.repo.list_items(share_id, None).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request-side operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a share, or return the live one for the same tuple.
    pub async fn create_share(
        &self,
        dataset_id: DatasetId,
        environment_id: EnvironmentId,
        principal: SharePrincipal,
        owner: &str,
    ) -> Result<ShareObject> {
        if let Some(existing) = self
            .repo
            .find_active_share(&dataset_id, &environment_id, &principal.id)
            .await?
        {
            debug!(share_id = %existing.id, "share already exists");
            return Ok(existing);
        }

        let share = ShareObject::new(dataset_id, environment_id, principal, owner);
        self.repo.insert_share(&share).await?;
        info!(
            share_id = %share.id,
            dataset_id = %share.dataset_id,
            principal = %share.principal.id,
            "share created"
        );
        Ok(share)
    }

    /// Attach a resource to a share, re-opening it if it was finalized.
    pub async fn add_item(
        &self,
        share_id: &ShareId,
        resource_id: ResourceId,
        kind: ItemKind,
    ) -> Result<ShareItem> {
        let share = self.share(share_id).await?;
        let next = ShareAction::AddItem.apply(share.status)?;

        let existing = self.items(share_id).await?;
        if existing.iter().any(|item| item.resource.id == resource_id) {
            return Err(ShareError::DuplicateItem(resource_id));
        }

        let item = ShareItem::new(share_id.clone(), resource_id, kind);
        self.repo.insert_item(&item).await?;
        self.write_share_status(&share, next).await?;
        info!(share_id = %share_id, item_id = %item.id, kind = %kind, "item added");
        Ok(item)
    }

    /// Detach an item that is not currently shared.
    pub async fn remove_item(&self, item_id: &ItemId) -> Result<()> {
        let item = self.item(item_id).await?;
        ShareItemAction::RemoveItem.apply(item.status)?;
        self.repo.delete_item(item_id).await?;
        info!(share_id = %item.share_id, item_id = %item_id, "item removed");
        Ok(())
    }

    /// Apply a share action, mirroring request actions onto every item.
    ///
    /// Every item transition is validated before anything is written.
    pub async fn apply(&self, share_id: &ShareId, action: ShareAction) -> Result<ShareStatus> {
        let share = self.share(share_id).await?;
        let next = action.apply(share.status)?;

        match action {
            ShareAction::Submit => self.mirror(share_id, ShareItemAction::Submit).await?,
            ShareAction::Approve => self.mirror(share_id, ShareItemAction::Approve).await?,
            ShareAction::Reject => self.mirror(share_id, ShareItemAction::Reject).await?,
            ShareAction::Delete => self.delete_items(share_id).await?,
            _ => {}
        }

        self.write_share_status(&share, next).await?;
        Ok(next)
    }

    async fn mirror(&self, share_id: &ShareId, action: ShareItemAction) -> Result<()> {
        let items = self.items(share_id).await?;
        let moves = items
            .iter()
            .map(|item| -> Result<_> { Ok((item, action.apply(item.status)?)) })
            .collect::<Result<Vec<_>>>()?;

        for (item, next) in moves {
            self.write_item_status(item, next).await?;
        }
        Ok(())
    }

    async fn delete_items(&self, share_id: &ShareId) -> Result<()> {
        let items = self.items(share_id).await?;
        let shared = items.iter().filter(|item| item.status.is_shared()).count();
        if shared > 0 {
            return Err(ShareError::ItemsStillShared {
                share: share_id.clone(),
                count: shared,
            });
        }
        for item in &items {
            ShareItemAction::Delete.apply(item.status)?;
        }
        for item in &items {
            self.repo.delete_item(&item.id).await?;
        }
        debug!(share_id = %share_id, deleted = items.len(), "items deleted with share");
        Ok(())
    }

    /// Request revocation of some shared items.
    pub async fn revoke_items(&self, share_id: &ShareId, item_ids: &[ItemId]) -> Result<ShareStatus> {
        let share = self.share(share_id).await?;
        let next = ShareAction::RevokeItems.apply(share.status)?;

        let mut moves = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            let item = self.item(id).await?;
            if &item.share_id != share_id {
                return Err(ShareError::ItemNotInShare {
                    share: share_id.clone(),
                    item: id.clone(),
                });
            }
            let item_next = ShareItemAction::RevokeItems.apply(item.status)?;
            moves.push((item, item_next));
        }

        for (item, item_next) in &moves {
            self.write_item_status(item, *item_next).await?;
        }
        self.write_share_status(&share, next).await?;
        Ok(next)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Produced contract
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant one item. Returns the verification findings when
    /// `verify_after_grant` is set, otherwise an empty list.
    pub async fn grant_item(&self, item_id: &ItemId) -> Result<Vec<Finding>> {
        let (share, item) = self.share_and_item(item_id).await?;
        let manager = self.registry.manager_for(&share, &item).await?;
        self.grant_with(manager.as_ref()).await
    }

    /// Revoke one item. An empty list means the revoke went through.
    pub async fn revoke_item(&self, item_id: &ItemId) -> Result<Vec<Finding>> {
        let (share, item) = self.share_and_item(item_id).await?;
        let manager = self.registry.manager_for(&share, &item).await?;
        manager.revoke().await?;
        Ok(Vec::new())
    }

    /// Compare deployed policies with one item. Never writes anything.
    pub async fn verify_item(&self, item_id: &ItemId) -> Result<Vec<Finding>> {
        let (share, item) = self.share_and_item(item_id).await?;
        let manager = self.registry.manager_for(&share, &item).await?;
        Ok(manager.check().await?)
    }

    async fn share_and_item(&self, item_id: &ItemId) -> Result<(ShareObject, ShareItem)> {
        let item = self.item(item_id).await?;
        let share = self.share(&item.share_id).await?;
        Ok((share, item))
    }

    async fn grant_with(&self, manager: &dyn ShareManager) -> Result<Vec<Finding>> {
        manager.grant().await?;
        if self.config.verify_after_grant {
            return Ok(manager.check().await?);
        }
        Ok(Vec::new())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Worker flows
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant every approved item of the share.
    pub async fn process_approved(&self, share_id: &ShareId) -> Result<ProcessReport> {
        self.process(share_id, Direction::Grant).await
    }

    /// Revoke every item approved for revocation.
    pub async fn process_revoked(&self, share_id: &ShareId) -> Result<ProcessReport> {
        self.process(share_id, Direction::Revoke).await
    }

    async fn process(&self, share_id: &ShareId, direction: Direction) -> Result<ProcessReport> {
        let share = self.share(share_id).await?;
        let started = ShareAction::Start.apply(share.status)?;
        self.write_share_status(&share, started).await?;
        let share = ShareObject {
            status: started,
            ..share
        };
        info!(share_id = %share_id, ?direction, "processing share");

        let guard = match self.lock(&share).await {
            Ok(guard) => guard,
            Err(e) => {
                let rolled_back = ShareAction::AcquireLockFailure.apply(share.status)?;
                self.write_share_status(&share, rolled_back).await?;
                return Err(e);
            }
        };

        let outcome = self.process_locked(&share, direction).await;
        if let Err(e) = &outcome {
            error!(share_id = %share_id, ?direction, error = %e, "share processing aborted");
            self.abandon(&share, direction).await;
        }
        drop(guard);
        outcome
    }

    /// The body of a worker run; the caller holds the share's locks until
    /// this returns, final status included.
    async fn process_locked(&self, share: &ShareObject, direction: Direction) -> Result<ProcessReport> {
        let share_id = &share.id;
        let pending = match direction {
            Direction::Grant => ShareItemStatus::ShareApproved,
            Direction::Revoke => ShareItemStatus::RevokeApproved,
        };
        let items = self.repo.list_items(share_id, Some(pending)).await?;
        let mut report = ProcessReport::new(share_id.clone(), share.status);

        for item in items {
            match self.process_item(share, item, direction).await? {
                (id, None) => report.succeeded.push(id),
                (id, Some(message)) => report.failed.push((id, message)),
            }
        }

        if direction == Direction::Revoke && self.config.remove_items_after_revoke {
            self.remove_revoked(share_id).await?;
        }

        let finish = if direction == Direction::Revoke && self.has_pending_items(share_id).await? {
            ShareAction::FinishPending
        } else {
            ShareAction::Finish
        };
        report.status = finish.apply(share.status)?;
        self.write_share_status(share, report.status).await?;

        info!(
            share_id = %share_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            status = %report.status,
            "share processed"
        );
        Ok(report)
    }

    /// After a repository failure mid-run: fail the items left in progress
    /// and finish the share. Errors here are logged only.
    async fn abandon(&self, share: &ShareObject, direction: Direction) {
        let in_progress = match direction {
            Direction::Grant => ShareItemStatus::ShareInProgress,
            Direction::Revoke => ShareItemStatus::RevokeInProgress,
        };
        let cleanup = async {
            let failed = ShareItemAction::Failure.apply(in_progress)?;
            let moved = self.repo.apply_item_batch(&share.id, in_progress, failed).await?;
            let finished = ShareAction::Finish.apply(share.status)?;
            self.write_share_status(share, finished).await?;
            Ok::<_, ShareError>(moved)
        };
        match cleanup.await {
            Ok(moved) => warn!(share_id = %share.id, failed_items = moved, "interrupted run rolled forward"),
            Err(e) => error!(share_id = %share.id, error = %e, "could not clean up interrupted run"),
        }
    }

    /// Move one item through `Start` and `Success`/`Failure`. Only repository
    /// errors propagate; grant/revoke errors are recorded on the item.
    async fn process_item(
        &self,
        share: &ShareObject,
        item: ShareItem,
        direction: Direction,
    ) -> Result<(ItemId, Option<String>)> {
        let started = ShareItemAction::Start.apply(item.status)?;
        self.write_item_status(&item, started).await?;
        let item = ShareItem {
            status: started,
            ..item
        };

        let outcome = match self.registry.manager_for(share, &item).await {
            Ok(manager) => match direction {
                Direction::Grant => self.grant_with(manager.as_ref()).await.map(Some),
                Direction::Revoke => manager.revoke().await.map(|_| None).map_err(ShareError::from),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(findings) => {
                let done = ShareItemAction::Success.apply(item.status)?;
                self.write_item_status(&item, done).await?;
                if let Some(findings) = findings.filter(|_| self.config.verify_after_grant) {
                    let health = health_from_findings(&findings, now_millis());
                    self.repo.update_item_health(&item.id, &health).await?;
                }
                Ok((item.id, None))
            }
            Err(e) => {
                error!(share_id = %share.id, item_id = %item.id, ?direction, error = %e, "item failed");
                let failed = ShareItemAction::Failure.apply(item.status)?;
                self.write_item_status(&item, failed).await?;
                let message = e.to_string();
                self.repo
                    .update_item_health(&item.id, &ItemHealth::unhealthy(message.clone(), now_millis()))
                    .await?;
                Ok((item.id, Some(message)))
            }
        }
    }

    async fn remove_revoked(&self, share_id: &ShareId) -> Result<()> {
        let from = ShareItemStatus::RevokeSucceeded;
        ShareItemAction::RemoveItem.apply(from)?;
        let removed = self
            .repo
            .apply_item_batch(share_id, from, ShareItemStatus::Deleted)
            .await?;
        if removed > 0 {
            info!(share_id = %share_id, removed, "revoked items removed");
        }
        Ok(())
    }

    async fn has_pending_items(&self, share_id: &ShareId) -> Result<bool> {
        let pending = self
            .repo
            .list_items(share_id, Some(ShareItemStatus::PendingApproval))
            .await?;
        Ok(!pending.is_empty())
    }

    /// Verify every currently shared item and record its health.
    pub async fn verify_share(&self, share_id: &ShareId) -> Result<Vec<(ItemId, ItemHealth)>> {
        let share = self.share(share_id).await?;
        let mut results = Vec::new();

        for item in self.items(share_id).await? {
            if !item.status.is_shared() {
                continue;
            }
            let health = match self.check_item(&share, &item).await {
                Ok(health) => health,
                Err(e) => {
                    warn!(share_id = %share_id, item_id = %item.id, error = %e, "verification failed");
                    ItemHealth::unhealthy(e.to_string(), now_millis())
                }
            };
            self.repo.update_item_health(&item.id, &health).await?;
            debug!(share_id = %share_id, item_id = %item.id, status = %health.status, "item verified");
            results.push((item.id, health));
        }
        Ok(results)
    }

    async fn check_item(&self, share: &ShareObject, item: &ShareItem) -> Result<ItemHealth> {
        let manager = self.registry.manager_for(share, item).await?;
        let (_, health) = HealthVerifier::new(manager.as_ref()).verify().await?;
        Ok(health)
    }

    /// Re-grant items marked unhealthy or queued for re-application.
    pub async fn reapply_share(&self, share_id: &ShareId) -> Result<ProcessReport> {
        let share = self.share(share_id).await?;
        let items: Vec<ShareItem> = self
            .items(share_id)
            .await?
            .into_iter()
            .filter(|item| item.status == ShareItemStatus::ShareSucceeded)
            .filter(|item| {
                matches!(
                    item.health.status,
                    HealthStatus::Unhealthy | HealthStatus::PendingReApply
                )
            })
            .collect();
        let mut report = ProcessReport::new(share_id.clone(), share.status);
        if items.is_empty() {
            debug!(share_id = %share_id, "nothing to reapply");
            return Ok(report);
        }

        let _guard = match self.lock(&share).await {
            Ok(guard) => guard,
            Err(e) => {
                let message = e.to_string();
                for item in &items {
                    self.repo
                        .update_item_health(&item.id, &ItemHealth::unhealthy(message.clone(), now_millis()))
                        .await?;
                }
                return Err(e);
            }
        };

        for item in items {
            let outcome = match self.registry.manager_for(&share, &item).await {
                Ok(manager) => match manager.grant().await {
                    Ok(()) => manager.check().await.map_err(ShareError::from),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            let health = match outcome {
                Ok(findings) => health_from_findings(&findings, now_millis()),
                Err(e) => ItemHealth::unhealthy(e.to_string(), now_millis()),
            };
            self.repo.update_item_health(&item.id, &health).await?;
            if health.status == HealthStatus::Healthy {
                report.succeeded.push(item.id);
            } else {
                let message = health.message.unwrap_or_default();
                warn!(share_id = %share_id, item_id = %item.id, %message, "reapply left item unhealthy");
                report.failed.push((item.id, message));
            }
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    async fn lock(&self, share: &ShareObject) -> Result<LockGuard> {
        self.locks.acquire(&share_lock_resources(share)).await
    }

    async fn write_share_status(&self, share: &ShareObject, next: ShareStatus) -> Result<()> {
        if share.status == next {
            return Ok(());
        }
        self.repo.update_share_status(&share.id, next).await?;
        info!(share_id = %share.id, from = %share.status, to = %next, "share status updated");
        Ok(())
    }

    async fn write_item_status(&self, item: &ShareItem, next: ShareItemStatus) -> Result<()> {
        if item.status == next {
            return Ok(());
        }
        self.repo.update_item_status(&item.id, next).await?;
        debug!(item_id = %item.id, from = %item.status, to = %next, "item status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use lakeshare_core::{PrincipalId, PrincipalKind};
    use lakeshare_policy::{FindingKind, PolicyError};
    use lakeshare_store::{MemoryRepository, StoreError};

    use crate::lock::MemoryLockProvider;

    /// Records every call; fails grants of resources named in `failing`.
    #[derive(Default)]
    struct Calls {
        grants: Vec<String>,
        revokes: Vec<String>,
        checks: usize,
        failing: Vec<String>,
    }

    struct StubManager {
        resource: String,
        calls: Arc<Mutex<Calls>>,
    }

    #[async_trait]
    impl ShareManager for StubManager {
        async fn grant(&self) -> lakeshare_policy::Result<()> {
            let mut calls = self.calls.lock().unwrap();
            if calls.failing.contains(&self.resource) {
                return Err(PolicyError::ResourceNotFound(self.resource.clone()));
            }
            calls.grants.push(self.resource.clone());
            Ok(())
        }

        async fn revoke(&self) -> lakeshare_policy::Result<()> {
            self.calls.lock().unwrap().revokes.push(self.resource.clone());
            Ok(())
        }

        async fn check(&self) -> lakeshare_policy::Result<Vec<Finding>> {
            let mut calls = self.calls.lock().unwrap();
            calls.checks += 1;
            if calls.grants.contains(&self.resource) {
                Ok(Vec::new())
            } else {
                Ok(vec![Finding::missing("role", self.resource.clone())])
            }
        }
    }

    struct StubRegistry {
        calls: Arc<Mutex<Calls>>,
    }

    #[async_trait]
    impl ManagerRegistry for StubRegistry {
        async fn manager_for(
            &self,
            _share: &ShareObject,
            item: &ShareItem,
        ) -> Result<Box<dyn ShareManager>> {
            if item.resource.kind == ItemKind::Table {
                return Err(ShareError::UnsupportedItem(item.resource.kind));
            }
            Ok(Box::new(StubManager {
                resource: item.resource.id.to_string(),
                calls: self.calls.clone(),
            }))
        }
    }

    fn engine(config: EngineConfig) -> (ShareEngine<MemoryRepository>, Arc<Mutex<Calls>>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let calls = Arc::new(Mutex::new(Calls::default()));
        let locks = MemoryLockProvider::new(Duration::from_millis(20), Duration::from_millis(5));
        let engine = ShareEngine::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(StubRegistry { calls: calls.clone() }),
            Arc::new(locks),
            config,
        );
        (engine, calls)
    }

    async fn approved<R: Repository>(
        engine: &ShareEngine<R>,
        resources: &[(&str, ItemKind)],
    ) -> ShareObject {
        let share = engine
            .create_share(
                DatasetId::new("d1"),
                EnvironmentId::new("e1"),
                SharePrincipal::new("team", PrincipalKind::Group, "team-role"),
                "owner",
            )
            .await
            .unwrap();
        for (resource, kind) in resources {
            engine
                .add_item(&share.id, ResourceId::new(*resource), *kind)
                .await
                .unwrap();
        }
        engine.apply(&share.id, ShareAction::Submit).await.unwrap();
        engine.apply(&share.id, ShareAction::Approve).await.unwrap();
        engine.share(&share.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_process_grants_every_approved_item() {
        let (engine, calls) = engine(EngineConfig::default());
        let share = approved(
            &engine,
            &[("raw", ItemKind::StorageLocation), ("bucket", ItemKind::S3Bucket)],
        )
        .await;

        let report = engine.process_approved(&share.id).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.status, ShareStatus::Processed);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.grants, vec!["raw".to_string(), "bucket".to_string()]);
        assert_eq!(calls.checks, 2);
        drop(calls);

        for item in engine.items(&share.id).await.unwrap() {
            assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
            assert_eq!(item.health.status, HealthStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_item() {
        let (engine, calls) = engine(EngineConfig::default());
        calls.lock().unwrap().failing.push("raw".to_string());
        let share = approved(
            &engine,
            &[
                ("raw", ItemKind::StorageLocation),
                ("orders", ItemKind::Table),
                ("bucket", ItemKind::S3Bucket),
            ],
        )
        .await;

        let report = engine.process_approved(&share.id).await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.status, ShareStatus::Processed);

        for item in engine.items(&share.id).await.unwrap() {
            if item.resource.id.as_str() == "bucket" {
                assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
            } else {
                assert_eq!(item.status, ShareItemStatus::ShareFailed);
                assert_eq!(item.health.status, HealthStatus::Unhealthy);
            }
        }
    }

    #[tokio::test]
    async fn test_grant_without_verification() {
        let config = EngineConfig {
            verify_after_grant: false,
            ..EngineConfig::default()
        };
        let (engine, calls) = engine(config);
        let share = approved(&engine, &[("raw", ItemKind::StorageLocation)]).await;

        engine.process_approved(&share.id).await.unwrap();
        assert_eq!(calls.lock().unwrap().checks, 0);
        let item = &engine.items(&share.id).await.unwrap()[0];
        assert_eq!(item.health, ItemHealth::default());
        assert!(engine.grant_item(&item.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_item_reports_no_findings() {
        let (engine, calls) = engine(EngineConfig::default());
        let share = approved(&engine, &[("raw", ItemKind::StorageLocation)]).await;
        engine.process_approved(&share.id).await.unwrap();
        let item = &engine.items(&share.id).await.unwrap()[0];

        assert!(engine.revoke_item(&item.id).await.unwrap().is_empty());
        assert_eq!(calls.lock().unwrap().revokes, vec!["raw".to_string()]);
        // Direct calls leave statuses alone.
        assert_eq!(engine.item(&item.id).await.unwrap().status, ShareItemStatus::ShareSucceeded);
    }

    #[tokio::test]
    async fn test_verify_share_skips_unshared_items() {
        let (engine, _calls) = engine(EngineConfig::default());
        let share = approved(&engine, &[("raw", ItemKind::StorageLocation)]).await;

        assert!(engine.verify_share(&share.id).await.unwrap().is_empty());
        engine.process_approved(&share.id).await.unwrap();
        let results = engine.verify_share(&share.id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_reapply_targets_unhealthy_items() {
        let (engine, calls) = engine(EngineConfig::default());
        let share = approved(&engine, &[("raw", ItemKind::StorageLocation)]).await;
        engine.process_approved(&share.id).await.unwrap();
        let item = engine.items(&share.id).await.unwrap().remove(0);

        let report = engine.reapply_share(&share.id).await.unwrap();
        assert!(report.succeeded.is_empty());

        calls.lock().unwrap().grants.clear();
        let results = engine.verify_share(&share.id).await.unwrap();
        assert_eq!(results[0].1.status, HealthStatus::Unhealthy);
        let findings = engine.verify_item(&item.id).await.unwrap();
        assert_eq!(findings[0].kind, FindingKind::ResourceMissing);

        let report = engine.reapply_share(&share.id).await.unwrap();
        assert_eq!(report.succeeded, vec![item.id.clone()]);
        assert_eq!(engine.item(&item.id).await.unwrap().health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_process_requires_startable_share() {
        let (engine, _calls) = engine(EngineConfig::default());
        let share = engine
            .create_share(
                DatasetId::new("d1"),
                EnvironmentId::new("e1"),
                SharePrincipal::new("team", PrincipalKind::Group, "team-role"),
                "owner",
            )
            .await
            .unwrap();
        let err = engine.process_approved(&share.id).await.unwrap_err();
        assert!(matches!(err, ShareError::Core(_)));
        assert_eq!(engine.share(&share.id).await.unwrap().status, ShareStatus::Draft);
    }

    /// Memory repository that notes whether the share's locks were held at
    /// each finishing status write and each delete, and can fail one item
    /// status write.
    struct WatchedRepository {
        inner: MemoryRepository,
        locks: MemoryLockProvider,
        held_at_finish: Mutex<Vec<bool>>,
        held_at_delete: Mutex<Vec<bool>>,
        fail_status: Mutex<Option<ShareItemStatus>>,
    }

    impl WatchedRepository {
        fn share_locked(&self) -> bool {
            self.locks.is_held("dataset/d1") && self.locks.is_held("environment_group/team-e1")
        }
    }

    #[async_trait]
    impl Repository for WatchedRepository {
        async fn insert_share(&self, share: &ShareObject) -> lakeshare_store::Result<()> {
            self.inner.insert_share(share).await
        }

        async fn get_share(&self, id: &ShareId) -> lakeshare_store::Result<Option<ShareObject>> {
            self.inner.get_share(id).await
        }

        async fn find_active_share(
            &self,
            dataset_id: &DatasetId,
            environment_id: &EnvironmentId,
            principal_id: &PrincipalId,
        ) -> lakeshare_store::Result<Option<ShareObject>> {
            self.inner
                .find_active_share(dataset_id, environment_id, principal_id)
                .await
        }

        async fn update_share_status(
            &self,
            id: &ShareId,
            status: ShareStatus,
        ) -> lakeshare_store::Result<()> {
            if status == ShareStatus::Processed {
                let locked = self.share_locked();
                self.held_at_finish.lock().unwrap().push(locked);
            }
            self.inner.update_share_status(id, status).await
        }

        async fn insert_item(&self, item: &ShareItem) -> lakeshare_store::Result<()> {
            self.inner.insert_item(item).await
        }

        async fn get_item(&self, id: &ItemId) -> lakeshare_store::Result<Option<ShareItem>> {
            self.inner.get_item(id).await
        }

        async fn list_items(
            &self,
            share_id: &ShareId,
            status: Option<ShareItemStatus>,
        ) -> lakeshare_store::Result<Vec<ShareItem>> {
            self.inner.list_items(share_id, status).await
        }

        async fn update_item_status(
            &self,
            id: &ItemId,
            status: ShareItemStatus,
        ) -> lakeshare_store::Result<()> {
            if *self.fail_status.lock().unwrap() == Some(status) {
                return Err(StoreError::Task("write lost".to_string()));
            }
            self.inner.update_item_status(id, status).await
        }

        async fn batch_update_item_status(
            &self,
            share_id: &ShareId,
            old: ShareItemStatus,
            new: ShareItemStatus,
        ) -> lakeshare_store::Result<usize> {
            self.inner.batch_update_item_status(share_id, old, new).await
        }

        async fn update_item_health(
            &self,
            id: &ItemId,
            health: &ItemHealth,
        ) -> lakeshare_store::Result<()> {
            self.inner.update_item_health(id, health).await
        }

        async fn delete_item(&self, id: &ItemId) -> lakeshare_store::Result<()> {
            let locked = self.share_locked();
            self.held_at_delete.lock().unwrap().push(locked);
            self.inner.delete_item(id).await
        }
    }

    fn watched_engine(config: EngineConfig) -> (ShareEngine<WatchedRepository>, Arc<WatchedRepository>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let locks = MemoryLockProvider::new(Duration::from_millis(20), Duration::from_millis(5));
        let repo = Arc::new(WatchedRepository {
            inner: MemoryRepository::new(),
            locks: locks.clone(),
            held_at_finish: Mutex::new(Vec::new()),
            held_at_delete: Mutex::new(Vec::new()),
            fail_status: Mutex::new(None),
        });
        let engine = ShareEngine::new(
            repo.clone(),
            Arc::new(StubRegistry {
                calls: Arc::new(Mutex::new(Calls::default())),
            }),
            Arc::new(locks),
            config,
        );
        (engine, repo)
    }

    #[tokio::test]
    async fn test_locks_held_until_share_finished() {
        let config = EngineConfig {
            remove_items_after_revoke: true,
            ..EngineConfig::default()
        };
        let (engine, repo) = watched_engine(config);
        let share = approved(
            &engine,
            &[("raw", ItemKind::StorageLocation), ("bucket", ItemKind::S3Bucket)],
        )
        .await;

        engine.process_approved(&share.id).await.unwrap();
        assert_eq!(*repo.held_at_finish.lock().unwrap(), vec![true]);
        assert!(!repo.share_locked());

        let ids: Vec<ItemId> = engine
            .items(&share.id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        engine.revoke_items(&share.id, &ids).await.unwrap();
        let report = engine.process_revoked(&share.id).await.unwrap();
        assert_eq!(report.succeeded.len(), 2);
        assert!(engine.items(&share.id).await.unwrap().is_empty());

        assert_eq!(*repo.held_at_delete.lock().unwrap(), vec![true, true]);
        assert_eq!(*repo.held_at_finish.lock().unwrap(), vec![true, true]);
        assert!(!repo.share_locked());
    }

    #[tokio::test]
    async fn test_store_failure_mid_run_finishes_share() {
        let (engine, repo) = watched_engine(EngineConfig::default());
        let share = approved(&engine, &[("raw", ItemKind::StorageLocation)]).await;
        *repo.fail_status.lock().unwrap() = Some(ShareItemStatus::ShareSucceeded);

        let err = engine.process_approved(&share.id).await.unwrap_err();
        assert!(matches!(err, ShareError::Store(StoreError::Task(_))));

        assert_eq!(engine.share(&share.id).await.unwrap().status, ShareStatus::Processed);
        let item = engine.items(&share.id).await.unwrap().remove(0);
        assert_eq!(item.status, ShareItemStatus::ShareFailed);
        assert_eq!(*repo.held_at_finish.lock().unwrap(), vec![true]);
        assert!(!repo.share_locked());
    }
}
