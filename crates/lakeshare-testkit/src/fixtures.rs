//! Test fixtures and helpers.
//!
//! A [`TestFixture`] wires a [`ShareEngine`] to an in-memory repository, an
//! in-process lock provider and two [`MemoryCloud`]s: one for the principal's
//! account and one for the account owning the dataset.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lakeshare::{
    CloudManagerRegistry, EngineConfig, ManagerRegistry, MemoryLockProvider, ShareEngine,
    ShareTarget, TargetResolver,
};
use lakeshare_core::{
    DatasetId, EnvironmentId, ItemKind, PrincipalKind, ResourceId, ShareAction, ShareItem,
    ShareObject, SharePrincipal,
};
use lakeshare_policy::{
    AccessPointTarget, BucketTarget, CloudClients, CloudError, DatasetLocation, Finding,
    PrincipalContext, ShareManager,
};
use lakeshare_store::MemoryRepository;

use crate::cloud::MemoryCloud;

pub const PRINCIPAL_ACCOUNT: &str = "111111111111";
pub const DATASET_ACCOUNT: &str = "222222222222";
pub const REGION: &str = "eu-west-1";
pub const DATASET_ID: &str = "sales";
pub const ENVIRONMENT_ID: &str = "analytics";
pub const BUCKET: &str = "sales-bucket";
pub const KEY_ALIAS: &str = "sales-key";
pub const RESOURCE_PREFIX: &str = "dataall";

/// Engine configuration with short lock timeouts and no polling delays.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig {
        lock_timeout: Duration::from_millis(50),
        lock_poll_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    };
    config.policy.call_timeout = Duration::from_secs(5);
    config.policy.access_point_poll_interval = Duration::ZERO;
    config
}

/// Route engine logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves every share against one dataset and two accounts.
///
/// Storage locations are shared through access points with the resource id
/// as the prefix; buckets through the bucket policy. Tables are not cloud
/// policy shares and resolve to no target.
pub struct StaticResolver {
    principal_cloud: Arc<MemoryCloud>,
    dataset_cloud: Arc<MemoryCloud>,
    location: DatasetLocation,
}

impl StaticResolver {
    pub fn new(
        principal_cloud: Arc<MemoryCloud>,
        dataset_cloud: Arc<MemoryCloud>,
        location: DatasetLocation,
    ) -> Self {
        Self {
            principal_cloud,
            dataset_cloud,
            location,
        }
    }
}

#[async_trait]
impl TargetResolver for StaticResolver {
    async fn principal(&self, share: &ShareObject) -> anyhow::Result<PrincipalContext> {
        Ok(PrincipalContext {
            principal_id: share.principal.id.to_string(),
            role_name: share.principal.role_name.clone(),
            account: self.principal_cloud.account().to_string(),
            environment_id: share.environment_id.to_string(),
            resource_prefix: RESOURCE_PREFIX.to_string(),
        })
    }

    async fn target(
        &self,
        _share: &ShareObject,
        item: &ShareItem,
    ) -> anyhow::Result<Option<ShareTarget>> {
        let target = match item.resource.kind {
            ItemKind::StorageLocation => Some(ShareTarget::AccessPoint(AccessPointTarget {
                location: self.location.clone(),
                prefix: item.resource.id.to_string(),
            })),
            ItemKind::S3Bucket => Some(ShareTarget::Bucket(BucketTarget {
                location: self.location.clone(),
            })),
            ItemKind::Table => None,
        };
        Ok(target)
    }

    async fn clients(&self, _share: &ShareObject) -> anyhow::Result<CloudClients> {
        Ok(CloudClients::new(
            self.principal_cloud.clone(),
            self.dataset_cloud.clone(),
            self.dataset_cloud.clone(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tables
// ─────────────────────────────────────────────────────────────────────────────

/// Records table grants so table items can take part in share scenarios.
#[derive(Debug, Default)]
pub struct TableCatalog {
    granted: Mutex<BTreeSet<(String, ResourceId)>>,
    failing: AtomicBool,
}

impl TableCatalog {
    pub fn is_granted(&self, principal: &str, table: &ResourceId) -> bool {
        self.granted
            .lock()
            .expect("table catalog poisoned")
            .contains(&(principal.to_string(), table.clone()))
    }

    /// Make every table grant and revoke fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> lakeshare_policy::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudError::new(operation, "injected failure").into());
        }
        Ok(())
    }
}

struct TableShareManager {
    catalog: Arc<TableCatalog>,
    principal: String,
    table: ResourceId,
}

#[async_trait]
impl ShareManager for TableShareManager {
    async fn grant(&self) -> lakeshare_policy::Result<()> {
        self.catalog.check("lakeformation:GrantPermissions")?;
        self.catalog
            .granted
            .lock()
            .expect("table catalog poisoned")
            .insert((self.principal.clone(), self.table.clone()));
        Ok(())
    }

    async fn revoke(&self) -> lakeshare_policy::Result<()> {
        self.catalog.check("lakeformation:RevokePermissions")?;
        self.catalog
            .granted
            .lock()
            .expect("table catalog poisoned")
            .remove(&(self.principal.clone(), self.table.clone()));
        Ok(())
    }

    async fn check(&self) -> lakeshare_policy::Result<Vec<Finding>> {
        if self.catalog.is_granted(&self.principal, &self.table) {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::missing(&self.principal, self.table.to_string())])
    }
}

/// Cloud managers for locations and buckets, the [`TableCatalog`] for tables.
pub struct FixtureRegistry {
    cloud: CloudManagerRegistry<StaticResolver>,
    tables: Arc<TableCatalog>,
}

impl FixtureRegistry {
    pub fn new(cloud: CloudManagerRegistry<StaticResolver>, tables: Arc<TableCatalog>) -> Self {
        Self { cloud, tables }
    }
}

#[async_trait]
impl ManagerRegistry for FixtureRegistry {
    async fn manager_for(
        &self,
        share: &ShareObject,
        item: &ShareItem,
    ) -> lakeshare::Result<Box<dyn ShareManager>> {
        if item.resource.kind == ItemKind::Table {
            return Ok(Box::new(TableShareManager {
                catalog: self.tables.clone(),
                principal: share.principal.role_name.clone(),
                table: item.resource.id.clone(),
            }));
        }
        self.cloud.manager_for(share, item).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixture
// ─────────────────────────────────────────────────────────────────────────────

/// A share engine over in-memory storage and clouds.
pub struct TestFixture {
    pub principal_cloud: Arc<MemoryCloud>,
    pub dataset_cloud: Arc<MemoryCloud>,
    pub tables: Arc<TableCatalog>,
    pub locks: MemoryLockProvider,
    pub location: DatasetLocation,
    pub engine: ShareEngine<MemoryRepository>,
}

impl TestFixture {
    /// Create a fixture with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a fixture with a custom engine configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let principal_cloud = Arc::new(MemoryCloud::new(PRINCIPAL_ACCOUNT, REGION));
        let dataset_cloud = Arc::new(MemoryCloud::new(DATASET_ACCOUNT, REGION));
        dataset_cloud.add_bucket(BUCKET);
        dataset_cloud.add_key(KEY_ALIAS);

        let location = DatasetLocation {
            dataset_id: DATASET_ID.to_string(),
            account: DATASET_ACCOUNT.to_string(),
            region: REGION.to_string(),
            bucket: BUCKET.to_string(),
            kms_alias: Some(KEY_ALIAS.to_string()),
        };
        let resolver = StaticResolver::new(
            principal_cloud.clone(),
            dataset_cloud.clone(),
            location.clone(),
        );
        let tables = Arc::new(TableCatalog::default());
        let registry = FixtureRegistry::new(
            CloudManagerRegistry::new(Arc::new(resolver), config.policy.clone()),
            tables.clone(),
        );
        let locks = MemoryLockProvider::new(config.lock_timeout, config.lock_poll_interval);
        let engine = ShareEngine::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(registry),
            Arc::new(locks.clone()),
            config,
        );

        Self {
            principal_cloud,
            dataset_cloud,
            tables,
            locks,
            location,
            engine,
        }
    }

    /// A group principal whose role exists in the principal's account.
    pub fn principal(&self, name: &str) -> SharePrincipal {
        let role_name = format!("{name}-role");
        self.principal_cloud.add_role(&role_name);
        SharePrincipal::new(name, PrincipalKind::Group, role_name)
    }

    /// Key id behind the dataset's key alias.
    pub fn key_id(&self) -> String {
        self.dataset_cloud
            .key_id(KEY_ALIAS)
            .expect("fixture key exists")
    }

    /// Create a share for `principal`, add `items`, submit and approve it.
    pub async fn approved_share(
        &self,
        principal: SharePrincipal,
        items: &[(&str, ItemKind)],
    ) -> (ShareObject, Vec<ShareItem>) {
        let share = self
            .engine
            .create_share(
                DatasetId::new(DATASET_ID),
                EnvironmentId::new(ENVIRONMENT_ID),
                principal,
                "owner@example.com",
            )
            .await
            .expect("create share");
        for (resource, kind) in items {
            self.engine
                .add_item(&share.id, ResourceId::new(*resource), *kind)
                .await
                .expect("add item");
        }
        self.engine
            .apply(&share.id, ShareAction::Submit)
            .await
            .expect("submit");
        self.engine
            .apply(&share.id, ShareAction::Approve)
            .await
            .expect("approve");

        let share = self.engine.share(&share.id).await.expect("share");
        let items = self.engine.items(&share.id).await.expect("items");
        (share, items)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
