//! Mapping share items to the manager that handles them.

use std::sync::Arc;

use async_trait::async_trait;
use lakeshare_core::{ShareItem, ShareObject};
use lakeshare_policy::{
    AccessPointShareManager, AccessPointTarget, BucketShareManager, BucketTarget, CloudClients,
    PolicyConfig, PrincipalContext, ShareManager,
};
use tracing::debug;

use crate::error::{Result, ShareError};

/// Produces the manager for one item of one share.
#[async_trait]
pub trait ManagerRegistry: Send + Sync {
    /// Fails with [`ShareError::UnsupportedItem`] for kinds it does not handle.
    async fn manager_for(&self, share: &ShareObject, item: &ShareItem)
        -> Result<Box<dyn ShareManager>>;
}

/// The cloud resource an item is shared through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareTarget {
    AccessPoint(AccessPointTarget),
    Bucket(BucketTarget),
}

/// Looks up everything the cloud managers need that is not stored on the
/// share itself: datasets, environments, roles and account credentials.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn principal(&self, share: &ShareObject) -> anyhow::Result<PrincipalContext>;

    /// `None` when the item is not shared through a cloud policy.
    async fn target(&self, share: &ShareObject, item: &ShareItem)
        -> anyhow::Result<Option<ShareTarget>>;

    /// Clients scoped to the principal's and the dataset's accounts.
    async fn clients(&self, share: &ShareObject) -> anyhow::Result<CloudClients>;
}

/// Registry building access point and bucket managers.
pub struct CloudManagerRegistry<T: TargetResolver> {
    resolver: Arc<T>,
    config: PolicyConfig,
}

impl<T: TargetResolver> CloudManagerRegistry<T> {
    pub fn new(resolver: Arc<T>, config: PolicyConfig) -> Self {
        Self { resolver, config }
    }
}

#[async_trait]
impl<T: TargetResolver + 'static> ManagerRegistry for CloudManagerRegistry<T> {
    async fn manager_for(
        &self,
        share: &ShareObject,
        item: &ShareItem,
    ) -> Result<Box<dyn ShareManager>> {
        let Some(target) = self.resolver.target(share, item).await? else {
            return Err(ShareError::UnsupportedItem(item.resource.kind));
        };
        let principal = self.resolver.principal(share).await?;
        let clients = self.resolver.clients(share).await?;
        debug!(share_id = %share.id, item_id = %item.id, kind = %item.resource.kind, "manager resolved");

        let manager: Box<dyn ShareManager> = match target {
            ShareTarget::AccessPoint(target) => Box::new(AccessPointShareManager::new(
                clients,
                principal,
                target,
                self.config.clone(),
            )),
            ShareTarget::Bucket(target) => Box::new(BucketShareManager::new(
                clients,
                principal,
                target,
                self.config.clone(),
            )),
        };
        Ok(manager)
    }
}
