//! Sharing a storage prefix through a per-principal access point.
//!
//! Every principal reading from a dataset gets one access point on the
//! dataset bucket. The bucket delegates access control to its access points;
//! each access point policy holds one statement pair per principal role,
//! bound to the role's unique id so a role recreated under the same name
//! does not inherit access.

use std::future::Future;

use async_trait::async_trait;
use lakeshare_core::{Effect, PolicyDocument, Principal, Statement, StatementFamily};
use tracing::{debug, info, warn};

use super::resource_policy::{
    add_principal, principal_findings, remove_principal, require_role_arn, resolve_key,
    role_arn_or_conventional, ResolvedKey,
};
use super::{AccessPointTarget, PrincipalContext, ShareManager};
use crate::cloud::{bounded, CloudClients, CloudResult};
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use crate::findings::{Finding, FindingKind};
use crate::naming::{access_point_arn, access_point_name, bucket_arn};
use crate::reconciler::{IndexedPolicyReconciler, ACCESS_POINT_STATEMENT_BASE};

/// Bucket policy statement delegating access control to access points.
pub const DELEGATE_SID: &str = "DelegateAccessToAccessPoint";

/// Key policy statement listing every access point grantee.
pub const ACCESS_POINT_KMS_SID: &str = "DataAll-Access-Point-KMS-Decrypt";

/// Statement of the default bucket policy.
pub const SECURE_TRANSPORT_SID: &str = "RequiredSecureTransport";

const STRING_LIKE: &str = "StringLike";
const PREFIX_KEY: &str = "s3:prefix";
const USER_ID_KEY: &str = "aws:userId";

pub struct AccessPointShareManager {
    clients: CloudClients,
    principal: PrincipalContext,
    target: AccessPointTarget,
    config: PolicyConfig,
}

impl AccessPointShareManager {
    pub fn new(
        clients: CloudClients,
        principal: PrincipalContext,
        target: AccessPointTarget,
        config: PolicyConfig,
    ) -> Self {
        Self {
            clients,
            principal,
            target,
            config,
        }
    }

    pub fn access_point_name(&self) -> String {
        access_point_name(&self.target.location.dataset_id, &self.principal.principal_id)
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
        StatementFamily::s3(ACCESS_POINT_STATEMENT_BASE)
    }

    fn kms_family() -> StatementFamily {
        StatementFamily::kms(ACCESS_POINT_STATEMENT_BASE)
    }

    /// What the principal's own policy must allow.
    fn principal_resources(&self, ap_arn: &str) -> Vec<String> {
        let bucket = bucket_arn(&self.target.location.bucket);
        vec![
            bucket.clone(),
            format!("{bucket}/*"),
            ap_arn.to_string(),
            format!("{ap_arn}/*"),
        ]
    }

    /// ARN of the access point, even if it does not exist (yet).
    fn expected_access_point_arn(&self) -> String {
        let location = &self.target.location;
        access_point_arn(&location.region, &location.account, &self.access_point_name())
    }

    async fn role_id(&self) -> Result<Option<String>> {
        self.call("iam:GetRole", self.clients.iam.get_role_id(&self.principal.role_name))
            .await
    }

    async fn key(&self) -> Result<Option<ResolvedKey>> {
        resolve_key(self.clients.kms.as_ref(), &self.target.location, self.config.call_timeout).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grant steps
    // ─────────────────────────────────────────────────────────────────────────

    /// Create the access point if needed and wait until it is usable.
    async fn ensure_access_point(&self) -> Result<String> {
        let name = self.access_point_name();
        let s3 = self.clients.s3.as_ref();
        if let Some(arn) = self.call("s3:GetAccessPoint", s3.get_access_point_arn(&name)).await? {
            return Ok(arn);
        }

        info!(access_point = %name, bucket = %self.target.location.bucket, "creating access point");
        self.call(
            "s3:CreateAccessPoint",
            s3.create_access_point(&self.target.location.bucket, &name),
        )
        .await?;

        for attempt in 1..=self.config.access_point_poll_attempts {
            if let Some(arn) = self.call("s3:GetAccessPoint", s3.get_access_point_arn(&name)).await? {
                return Ok(arn);
            }
            debug!(access_point = %name, attempt, "access point not available yet");
            tokio::time::sleep(self.config.access_point_poll_interval).await;
        }
        Err(PolicyError::ResourceNotFound(format!(
            "access point {name} did not become available"
        )))
    }

    async fn grant_bucket_delegation(&self) -> Result<()> {
        let location = &self.target.location;
        let current = self
            .call("s3:GetBucketPolicy", self.clients.s3.get_bucket_policy(&location.bucket))
            .await?;
        let statement = delegate_statement(&location.bucket, &location.account);
        if let Some(policy) = &current {
            if policy.statement(DELEGATE_SID) == Some(&statement) {
                return Ok(());
            }
        }

        let mut policy = current.unwrap_or_else(|| default_bucket_policy(&location.bucket));
        policy.upsert(statement);
        self.call(
            "s3:PutBucketPolicy",
            self.clients.s3.put_bucket_policy(&location.bucket, &policy),
        )
        .await?;
        info!(bucket = %location.bucket, "bucket delegates access to access points");
        Ok(())
    }

    async fn grant_access_point_policy(&self, ap_arn: &str, role_id: &str) -> Result<()> {
        let name = self.access_point_name();
        let mut policy = self
            .call("s3:GetAccessPointPolicy", self.clients.s3.get_access_point_policy(&name))
            .await?
            .unwrap_or_else(|| PolicyDocument::new(Vec::new()));

        if grant_prefix(&mut policy, role_id, ap_arn, &self.target.prefix) {
            self.call(
                "s3:PutAccessPointPolicy",
                self.clients.s3.put_access_point_policy(&name, &policy),
            )
            .await?;
            info!(access_point = %name, prefix = %self.target.prefix, "prefix granted on access point");
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
            add_principal(&mut policy, ACCESS_POINT_KMS_SID, role_arn, || {
                Statement::allow(ACCESS_POINT_KMS_SID, ["kms:Decrypt"], ["*"])
            })
        } else {
            remove_principal(&mut policy, ACCESS_POINT_KMS_SID, role_arn)
        };
        if changed {
            self.call("kms:PutKeyPolicy", kms.put_key_policy(&key.id, &policy)).await?;
            info!(key = %key.arn, role = %role_arn, grant, "key policy updated");
        }
        Ok(())
    }

    async fn verify_access_point(&self, role_arn: &str, role_id: &str) -> Result<Vec<Finding>> {
        let name = self.access_point_name();
        let s3 = self.clients.s3.as_ref();
        let Some(ap_arn) = self.call("s3:GetAccessPoint", s3.get_access_point_arn(&name)).await? else {
            return Ok(vec![Finding::missing(role_arn, name)]);
        };
        let policy = self
            .call("s3:GetAccessPointPolicy", s3.get_access_point_policy(&name))
            .await?;
        Ok(prefix_findings(
            policy.as_ref(),
            role_arn,
            role_id,
            &ap_arn,
            &name,
            &self.target.prefix,
        ))
    }
}

#[async_trait]
impl ShareManager for AccessPointShareManager {
    async fn grant(&self) -> Result<()> {
        let iam = self.clients.iam.as_ref();
        let role_arn = require_role_arn(iam, &self.principal, self.config.call_timeout).await?;
        let role_id = self
            .role_id()
            .await?
            .ok_or_else(|| PolicyError::PrincipalNotFound(self.principal.role_name.clone()))?;
        let key = self.key().await?;

        let ap_arn = self.ensure_access_point().await?;
        let reconciler = self.reconciler();
        reconciler
            .grant(&Self::s3_family(), &self.principal_resources(&ap_arn))
            .await?;
        if let Some(key) = &key {
            reconciler.grant(&Self::kms_family(), &[key.arn.clone()]).await?;
        }
        reconciler.ensure_attached().await?;

        self.grant_bucket_delegation().await?;
        self.grant_access_point_policy(&ap_arn, &role_id).await?;
        if let Some(key) = &key {
            self.update_key_policy(key, &role_arn, true).await?;
        }
        Ok(())
    }

    async fn revoke(&self) -> Result<()> {
        let name = self.access_point_name();
        let s3 = self.clients.s3.as_ref();
        let ap_arn = self.call("s3:GetAccessPoint", s3.get_access_point_arn(&name)).await?;
        let role_id = self.role_id().await?;

        let mut last_prefix = true;
        match (&ap_arn, &role_id) {
            (Some(ap_arn), Some(role_id)) => {
                let policy = self
                    .call("s3:GetAccessPointPolicy", s3.get_access_point_policy(&name))
                    .await?;
                if let Some(mut policy) = policy {
                    if revoke_prefix(&mut policy, role_id, ap_arn, &self.target.prefix) {
                        self.call("s3:PutAccessPointPolicy", s3.put_access_point_policy(&name, &policy))
                            .await?;
                        info!(access_point = %name, prefix = %self.target.prefix, "prefix revoked on access point");
                    }
                    last_prefix = policy.statement(&list_sid(role_id)).is_none();
                }
            }
            (None, _) => debug!(access_point = %name, "access point absent, nothing to revoke on it"),
            (Some(_), None) => {
                warn!(role = %self.principal.role_name, access_point = %name, "role id unknown, access point policy left as is")
            }
        }

        if !last_prefix {
            debug!(access_point = %name, "principal keeps other prefixes on this access point");
            return Ok(());
        }

        let iam = self.clients.iam.as_ref();
        let role_arn = role_arn_or_conventional(iam, &self.principal, self.config.call_timeout).await?;
        let ap_arn = ap_arn.unwrap_or_else(|| self.expected_access_point_arn());
        let key = self.key().await?;

        if let Some(key) = &key {
            self.update_key_policy(key, &role_arn, false).await?;
        }
        let reconciler = self.reconciler();
        reconciler
            .revoke(&Self::s3_family(), &self.principal_resources(&ap_arn))
            .await?;
        if let Some(key) = &key {
            reconciler.revoke(&Self::kms_family(), &[key.arn.clone()]).await?;
        }
        Ok(())
    }

    async fn check(&self) -> Result<Vec<Finding>> {
        let role = self.principal.role_name.as_str();
        let iam = self.clients.iam.as_ref();
        let role_arn = self.call("iam:GetRole", iam.get_role_arn(role)).await?;
        let role_id = self.role_id().await?;
        let (Some(role_arn), Some(role_id)) = (role_arn, role_id) else {
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
        let existing_ap = self
            .call("s3:GetAccessPoint", self.clients.s3.get_access_point_arn(&self.access_point_name()))
            .await?;
        let ap_arn = existing_ap.unwrap_or_else(|| self.expected_access_point_arn());

        findings.extend(
            reconciler
                .verify(&Self::s3_family(), &self.principal_resources(&ap_arn))
                .await?,
        );
        if let Some(key) = &key {
            findings.extend(reconciler.verify(&Self::kms_family(), &[key.arn.clone()]).await?);
        }

        let bucket = &self.target.location.bucket;
        let bucket_policy = self
            .call("s3:GetBucketPolicy", self.clients.s3.get_bucket_policy(bucket))
            .await?;
        if bucket_policy.as_ref().and_then(|p| p.statement(DELEGATE_SID)).is_none() {
            findings.push(Finding::new(
                FindingKind::MissingStatement,
                role_arn.as_str(),
                format!("{bucket}/{DELEGATE_SID}"),
                DELEGATE_SID,
                "absent",
            ));
        }

        findings.extend(self.verify_access_point(&role_arn, &role_id).await?);

        if let Some(key) = &key {
            let policy = self
                .call("kms:GetKeyPolicy", self.clients.kms.get_key_policy(&key.id))
                .await?;
            findings.extend(principal_findings(
                policy.as_ref(),
                ACCESS_POINT_KMS_SID,
                &role_arn,
                &key.arn,
            ));
        }

        if findings.is_empty() {
            debug!(role = %role, access_point = %self.access_point_name(), "access point share verified");
        } else {
            warn!(role = %role, findings = findings.len(), "access point share drifted");
        }
        Ok(findings)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy documents
// ─────────────────────────────────────────────────────────────────────────────

fn list_sid(role_id: &str) -> String {
    format!("{role_id}0")
}

fn read_sid(role_id: &str) -> String {
    format!("{role_id}1")
}

fn prefix_pattern(prefix: &str) -> String {
    format!("{prefix}/*")
}

fn object_resource(ap_arn: &str, prefix: &str) -> String {
    format!("{ap_arn}/object/{prefix}/*")
}

/// The bucket policy used when a bucket has none.
pub fn default_bucket_policy(bucket: &str) -> PolicyDocument {
    let arn = bucket_arn(bucket);
    PolicyDocument::new(vec![Statement::allow(
        SECURE_TRANSPORT_SID,
        ["s3:*"],
        [arn.clone(), format!("{arn}/*")],
    )
    .with_effect(Effect::Deny)
    .with_principal(Principal::any())
    .with_condition("Bool", "aws:SecureTransport", ["false"])])
}

pub fn delegate_statement(bucket: &str, account: &str) -> Statement {
    let arn = bucket_arn(bucket);
    Statement::allow(DELEGATE_SID, ["s3:*"], [arn.clone(), format!("{arn}/*")])
        .with_principal(Principal::any())
        .with_condition("StringEquals", "s3:DataAccessPointAccount", [account])
}

fn list_statement(role_id: &str, ap_arn: &str, prefix: &str) -> Statement {
    Statement::allow(list_sid(role_id), ["s3:ListBucket"], [ap_arn])
        .with_principal(Principal::any())
        .with_condition(STRING_LIKE, PREFIX_KEY, [prefix_pattern(prefix)])
        .with_condition(STRING_LIKE, USER_ID_KEY, [format!("{role_id}:*")])
}

fn read_statement(role_id: &str, ap_arn: &str, prefix: &str) -> Statement {
    Statement::allow(read_sid(role_id), ["s3:GetObject"], [object_resource(ap_arn, prefix)])
        .with_principal(Principal::any())
        .with_condition(STRING_LIKE, USER_ID_KEY, [format!("{role_id}:*")])
}

/// Add `prefix` to the role's statement pair. Returns whether anything changed.
pub fn grant_prefix(policy: &mut PolicyDocument, role_id: &str, ap_arn: &str, prefix: &str) -> bool {
    let mut changed = false;

    let list = list_sid(role_id);
    let existing = policy
        .statement_mut(&list)
        .and_then(|s| s.condition_mut(STRING_LIKE, PREFIX_KEY))
        .map(|prefixes| prefixes.insert(prefix_pattern(prefix)));
    match existing {
        Some(inserted) => changed |= inserted,
        None => {
            policy.upsert(list_statement(role_id, ap_arn, prefix));
            changed = true;
        }
    }

    match policy.statement_mut(&read_sid(role_id)) {
        Some(statement) => changed |= statement.resources.insert(object_resource(ap_arn, prefix)),
        None => {
            policy.statements.push(read_statement(role_id, ap_arn, prefix));
            changed = true;
        }
    }
    changed
}

/// Remove `prefix` from the role's statement pair, dropping the pair once no
/// prefix is left. Returns whether anything changed.
pub fn revoke_prefix(policy: &mut PolicyDocument, role_id: &str, ap_arn: &str, prefix: &str) -> bool {
    let list = list_sid(role_id);
    let read = read_sid(role_id);
    let mut changed = false;
    let mut remaining = 0;

    if let Some(prefixes) = policy
        .statement_mut(&list)
        .and_then(|s| s.condition_mut(STRING_LIKE, PREFIX_KEY))
    {
        changed |= prefixes.remove(&prefix_pattern(prefix));
        remaining = prefixes.len();
    }
    if let Some(statement) = policy.statement_mut(&read) {
        changed |= statement.resources.remove(&object_resource(ap_arn, prefix));
    }

    if remaining == 0 {
        changed |= policy.remove(&list);
        changed |= policy.remove(&read);
    }
    changed
}

fn prefix_findings(
    policy: Option<&PolicyDocument>,
    role_arn: &str,
    role_id: &str,
    ap_arn: &str,
    ap_name: &str,
    prefix: &str,
) -> Vec<Finding> {
    let Some(policy) = policy else {
        return vec![Finding::missing(role_arn, format!("{ap_name} policy"))];
    };
    let mut findings = Vec::new();

    let list = list_sid(role_id);
    let pattern = prefix_pattern(prefix);
    match policy.statement(&list) {
        None => findings.push(Finding::new(
            FindingKind::MissingStatement,
            role_arn,
            format!("{ap_name}/{list}"),
            list.as_str(),
            "absent",
        )),
        Some(statement) => {
            let prefixes = statement.condition(STRING_LIKE, PREFIX_KEY);
            if !prefixes.map_or(false, |p| p.contains(&pattern)) {
                findings.push(Finding::new(
                    FindingKind::MissingResources,
                    role_arn,
                    format!("{ap_name}/{list}"),
                    pattern,
                    prefixes.map(|p| p.0.join(", ")).unwrap_or_default(),
                ));
            }
        }
    }

    let read = read_sid(role_id);
    let object = object_resource(ap_arn, prefix);
    match policy.statement(&read) {
        None => findings.push(Finding::new(
            FindingKind::MissingStatement,
            role_arn,
            format!("{ap_name}/{read}"),
            read.as_str(),
            "absent",
        )),
        Some(statement) if !statement.resources.contains(&object) => findings.push(Finding::new(
            FindingKind::MissingResources,
            role_arn,
            format!("{ap_name}/{read}"),
            object,
            statement.resources.0.join(", "),
        )),
        Some(_) => {}
    }
    findings
}
