//! Sharing a whole bucket through its bucket policy.
//!
//! All grantees of a bucket share one read-only statement whose principal
//! list holds their role ARNs, and likewise one decrypt statement on the key.

use std::future::Future;

use async_trait::async_trait;
use lakeshare_core::{PolicyDocument, Statement, StatementFamily};
use tracing::{debug, info, warn};

use super::resource_policy::{
    add_principal, principal_findings, remove_principal, require_role_arn, resolve_key,
    role_arn_or_conventional, ResolvedKey,
};
use super::{BucketTarget, PrincipalContext, ShareManager};
use crate::cloud::{bounded, CloudClients, CloudResult};
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use crate::findings::{Finding, FindingKind};
use crate::naming::bucket_arn;
use crate::reconciler::{IndexedPolicyReconciler, BUCKET_STATEMENT_BASE};

/// Bucket policy statement listing every bucket grantee.
pub const BUCKET_READ_SID: &str = "DataAll-Bucket-ReadOnly";

/// Key policy statement listing every bucket grantee.
pub const BUCKET_KMS_SID: &str = "DataAll-Bucket-KMS-Decrypt";

pub struct BucketShareManager {
    clients: CloudClients,
    principal: PrincipalContext,
    target: BucketTarget,
    config: PolicyConfig,
}

impl BucketShareManager {
    pub fn new(
        clients: CloudClients,
        principal: PrincipalContext,
        target: BucketTarget,
        config: PolicyConfig,
    ) -> Self {
        Self {
            clients,
            principal,
            target,
            config,
        }
    }

    fn reconciler(&self) -> IndexedPolicyReconciler<'_> {
        IndexedPolicyReconciler::new(
            self.clients.iam.as_ref(),
            self.principal.role_name.as_str(),
            self.principal.policy_naming(),
            &self.config,
        )
    }

    async fn call<T>(&self, operation: &str, call: impl Future<Output = CloudResult<T>>) -> Result<T> {
        bounded(self.config.call_timeout, operation, call).await
    }

    fn s3_family() -> StatementFamily {
        StatementFamily::s3(BUCKET_STATEMENT_BASE)
    }

    fn kms_family() -> StatementFamily {
        StatementFamily::kms(BUCKET_STATEMENT_BASE)
    }

    fn bucket_resources(&self) -> Vec<String> {
        let arn = bucket_arn(&self.target.location.bucket);
        vec![arn.clone(), format!("{arn}/*")]
    }

    fn read_statement(&self) -> Statement {
        Statement::allow(
            BUCKET_READ_SID,
            ["s3:List*", "s3:GetObject"],
            self.bucket_resources(),
        )
    }

    async fn key(&self) -> Result<Option<ResolvedKey>> {
        resolve_key(self.clients.kms.as_ref(), &self.target.location, self.config.call_timeout).await
    }

    async fn update_bucket_policy(&self, role_arn: &str, grant: bool) -> Result<()> {
        let bucket = &self.target.location.bucket;
        let current = self
            .call("s3:GetBucketPolicy", self.clients.s3.get_bucket_policy(bucket))
            .await?;
        let mut policy = match current {
            Some(policy) => policy,
            None if grant => PolicyDocument::new(Vec::new()),
            None => return Ok(()),
        };

        let changed = if grant {
            add_principal(&mut policy, BUCKET_READ_SID, role_arn, || self.read_statement())
        } else {
            remove_principal(&mut policy, BUCKET_READ_SID, role_arn)
        };
        if changed {
            self.call("s3:PutBucketPolicy", self.clients.s3.put_bucket_policy(bucket, &policy))
                .await?;
            info!(bucket = %bucket, role = %role_arn, grant, "bucket policy updated");
        }
        Ok(())
    }

    async fn update_key_policy(&self, key: &ResolvedKey, role_arn: &str, grant: bool) -> Result<()> {
        let kms = self.clients.kms.as_ref();
        let policy = self.call("kms:GetKeyPolicy", kms.get_key_policy(&key.id)).await?;
        let Some(mut policy) = policy else {
            if grant {
                return Err(PolicyError::ResourceNotFound(key.arn.clone()));
            }
            return Ok(());
        };

        let changed = if grant {
            add_principal(&mut policy, BUCKET_KMS_SID, role_arn, || {
                Statement::allow(BUCKET_KMS_SID, ["kms:Decrypt"], ["*"])
            })
        } else {
            remove_principal(&mut policy, BUCKET_KMS_SID, role_arn)
        };
        if changed {
            self.call("kms:PutKeyPolicy", kms.put_key_policy(&key.id, &policy)).await?;
            info!(key = %key.arn, role = %role_arn, grant, "key policy updated");
        }
        Ok(())
    }
}

#[async_trait]
impl ShareManager for BucketShareManager {
    async fn grant(&self) -> Result<()> {
        let iam = self.clients.iam.as_ref();
        let role_arn = require_role_arn(iam, &self.principal, self.config.call_timeout).await?;
        let key = self.key().await?;

        let reconciler = self.reconciler();
        reconciler.grant(&Self::s3_family(), &self.bucket_resources()).await?;
        if let Some(key) = &key {
            reconciler.grant(&Self::kms_family(), &[key.arn.clone()]).await?;
        }
        reconciler.ensure_attached().await?;

        self.update_bucket_policy(&role_arn, true).await?;
        if let Some(key) = &key {
            self.update_key_policy(key, &role_arn, true).await?;
        }
        Ok(())
    }

    async fn revoke(&self) -> Result<()> {
        let iam = self.clients.iam.as_ref();
        let role_arn = role_arn_or_conventional(iam, &self.principal, self.config.call_timeout).await?;
        let key = self.key().await?;

        self.update_bucket_policy(&role_arn, false).await?;
        if let Some(key) = &key {
            self.update_key_policy(key, &role_arn, false).await?;
        }

        let reconciler = self.reconciler();
        reconciler.revoke(&Self::s3_family(), &self.bucket_resources()).await?;
        if let Some(key) = &key {
            reconciler.revoke(&Self::kms_family(), &[key.arn.clone()]).await?;
        }
        Ok(())
    }

    async fn check(&self) -> Result<Vec<Finding>> {
        let role = self.principal.role_name.as_str();
        let role_arn = self
            .call("iam:GetRole", self.clients.iam.get_role_arn(role))
            .await?;
        let Some(role_arn) = role_arn else {
            return Ok(vec![Finding::new(
                FindingKind::PrincipalNotFound,
                role,
                role,
                "exists",
                "absent",
            )]);
        };

        let mut findings = Vec::new();
        let reconciler = self.reconciler();
        let key = self.key().await?;

        findings.extend(reconciler.verify(&Self::s3_family(), &self.bucket_resources()).await?);
        if let Some(key) = &key {
            findings.extend(reconciler.verify(&Self::kms_family(), &[key.arn.clone()]).await?);
        }

        let bucket = &self.target.location.bucket;
        let bucket_policy = self
            .call("s3:GetBucketPolicy", self.clients.s3.get_bucket_policy(bucket))
            .await?;
        findings.extend(principal_findings(
            bucket_policy.as_ref(),
            BUCKET_READ_SID,
            &role_arn,
            bucket,
        ));

        if let Some(key) = &key {
            let policy = self
                .call("kms:GetKeyPolicy", self.clients.kms.get_key_policy(&key.id))
                .await?;
            findings.extend(principal_findings(policy.as_ref(), BUCKET_KMS_SID, &role_arn, &key.arn));
        }

        if findings.is_empty() {
            debug!(role = %role, bucket = %bucket, "bucket share verified");
        } else {
            warn!(role = %role, bucket = %bucket, findings = findings.len(), "bucket share drifted");
        }
        Ok(findings)
    }
}
