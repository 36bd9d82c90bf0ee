//! Resource share managers.
//!
//! One manager per shareable resource kind. Each combines the resource's own
//! policy, the policy of the key encrypting it and the principal's indexed
//! policies (through the reconciler) behind the same three operations.

use async_trait::async_trait;

use crate::error::Result;
use crate::findings::Finding;
use crate::naming::PolicyNaming;

pub mod access_point;
pub mod bucket;
mod resource_policy;

pub use access_point::AccessPointShareManager;
pub use bucket::BucketShareManager;

/// Grant, revoke and check access to one resource for one principal.
///
/// `grant` and `revoke` are idempotent and re-read every policy they touch.
/// `check` never writes.
#[async_trait]
pub trait ShareManager: Send + Sync {
    async fn grant(&self) -> Result<()>;

    async fn revoke(&self) -> Result<()>;

    async fn check(&self) -> Result<Vec<Finding>>;
}

/// The principal receiving access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    pub principal_id: String,
    /// Execution role of the principal, in `account`.
    pub role_name: String,
    pub account: String,
    pub environment_id: String,
    /// Prefix of every resource the platform creates in the environment.
    pub resource_prefix: String,
}

impl PrincipalContext {
    pub fn policy_naming(&self) -> PolicyNaming {
        PolicyNaming::new(&self.resource_prefix, &self.environment_id, &self.role_name)
    }
}

/// Where a dataset's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocation {
    pub dataset_id: String,
    pub account: String,
    pub region: String,
    pub bucket: String,
    /// Alias (without `alias/`) of the key encrypting the bucket.
    pub kms_alias: Option<String>,
}

/// A storage prefix shared through a per-principal access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointTarget {
    pub location: DatasetLocation,
    /// Object key prefix, without leading or trailing slash.
    pub prefix: String,
}

/// A whole bucket shared through the bucket policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTarget {
    pub location: DatasetLocation,
}
