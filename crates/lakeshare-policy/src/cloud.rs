//! Cloud interfaces consumed by the reconciler and the share managers.
//!
//! Clients are scoped by the caller: the IAM client talks to the principal's
//! account, the S3 and KMS clients to the account that owns the dataset.
//! Implementations must not retry internally; every call is wrapped in
//! [`bounded`] so none can block forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lakeshare_core::PolicyDocument;

use crate::error::{CloudError, Result};

/// Result of a single cloud call.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Identity and access management for the principal's account.
#[async_trait]
pub trait IamClient: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// ARN of the role, or `None` if it does not exist.
    async fn get_role_arn(&self, role_name: &str) -> CloudResult<Option<String>>;

    /// Unique id of the role. A role recreated under the same name gets a new id.
    async fn get_role_id(&self, role_name: &str) -> CloudResult<Option<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Managed policies
    // ─────────────────────────────────────────────────────────────────────────

    /// Names of customer-managed policies starting with `prefix`.
    async fn list_policies(&self, prefix: &str) -> CloudResult<Vec<String>>;

    async fn get_policy(&self, name: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn create_policy(&self, name: &str, document: &PolicyDocument) -> CloudResult<()>;

    /// Replace the policy's default version.
    async fn put_policy(&self, name: &str, document: &PolicyDocument) -> CloudResult<()>;

    async fn delete_policy(&self, name: &str) -> CloudResult<()>;

    /// Names of every managed policy attached to the role.
    async fn list_attached_policies(&self, role_name: &str) -> CloudResult<Vec<String>>;

    async fn attach_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()>;

    async fn detach_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()>;

    /// Maximum number of managed policies a role may hold, if known.
    async fn managed_policy_quota(&self) -> CloudResult<Option<usize>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Inline policies (legacy path only)
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> CloudResult<Option<PolicyDocument>>;

    async fn put_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> CloudResult<()>;

    async fn delete_inline_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()>;
}

/// Buckets and access points in the dataset's account.
#[async_trait]
pub trait S3Client: Send + Sync {
    async fn get_bucket_policy(&self, bucket: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &PolicyDocument) -> CloudResult<()>;

    /// ARN of the access point once it is usable, or `None`.
    async fn get_access_point_arn(&self, name: &str) -> CloudResult<Option<String>>;

    /// Request creation. The access point may take a while to appear.
    async fn create_access_point(&self, bucket: &str, name: &str) -> CloudResult<()>;

    async fn get_access_point_policy(&self, name: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn put_access_point_policy(&self, name: &str, policy: &PolicyDocument)
        -> CloudResult<()>;
}

/// Encryption keys in the dataset's account.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Resolve `alias/<name>` to a key id.
    async fn get_key_id(&self, alias: &str) -> CloudResult<Option<String>>;

    async fn get_key_policy(&self, key_id: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn put_key_policy(&self, key_id: &str, policy: &PolicyDocument) -> CloudResult<()>;
}

/// The set of clients one share needs.
#[derive(Clone)]
pub struct CloudClients {
    pub iam: Arc<dyn IamClient>,
    pub s3: Arc<dyn S3Client>,
    pub kms: Arc<dyn KmsClient>,
}

impl CloudClients {
    pub fn new(iam: Arc<dyn IamClient>, s3: Arc<dyn S3Client>, kms: Arc<dyn KmsClient>) -> Self {
        Self { iam, s3, kms }
    }

    /// Use one object for every interface.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: IamClient + S3Client + KmsClient + 'static,
    {
        Self {
            iam: provider.clone(),
            s3: provider.clone(),
            kms: provider,
        }
    }
}

/// Run a cloud call with a deadline.
pub async fn bounded<T, F>(timeout: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = CloudResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CloudError::new(operation, format!("timed out after {:?}", timeout)).into()),
    }
}
