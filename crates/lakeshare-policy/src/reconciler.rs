//! The indexed policy reconciler.
//!
//! A principal's share permissions live in a set of sibling managed policies
//! named `<base>-0`, `<base>-1`, ... Each operation reads every document,
//! computes the desired layout with the pure [`PolicySet`] operations, and
//! writes back only what changed. Nothing is cached between calls, so a
//! crashed run converges when re-invoked.

use lakeshare_core::chunking::{pack_statements, split_resources};
use lakeshare_core::{
    family_drift, PolicyDocument, PolicyPlan, PolicySet, Statement, StatementFamily,
};
use tracing::{debug, info, warn};

use crate::cloud::{bounded, CloudResult, IamClient};
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use crate::findings::{Finding, FindingKind};
use crate::naming::PolicyNaming;

/// Statement family base for access point shares.
pub const ACCESS_POINT_STATEMENT_BASE: &str = "AccessPointsStatement";

/// Statement family base for bucket shares.
pub const BUCKET_STATEMENT_BASE: &str = "BucketStatement";

/// Inline policy used for access point shares before managed policies.
pub const LEGACY_ACCESS_POINT_INLINE_POLICY: &str = "targetDatasetAccessControlPolicy";

/// Inline policy used for bucket shares before managed policies.
pub const LEGACY_BUCKET_INLINE_POLICY: &str = "dataall-targetDatasetS3Bucket-AccessControlPolicy";

/// Legacy inline policies and the family base their statements belong to.
/// Statement 0 holds S3 resources, statement 1 KMS resources.
const LEGACY_INLINE_POLICIES: &[(&str, &str)] = &[
    (LEGACY_ACCESS_POINT_INLINE_POLICY, ACCESS_POINT_STATEMENT_BASE),
    (LEGACY_BUCKET_INLINE_POLICY, BUCKET_STATEMENT_BASE),
];

/// Every family a share policy may carry, bucket shares first.
fn share_families() -> [StatementFamily; 4] {
    [
        StatementFamily::s3(BUCKET_STATEMENT_BASE),
        StatementFamily::kms(BUCKET_STATEMENT_BASE),
        StatementFamily::s3(ACCESS_POINT_STATEMENT_BASE),
        StatementFamily::kms(ACCESS_POINT_STATEMENT_BASE),
    ]
}

/// Keeps one role's indexed share policies in line with desired grants.
pub struct IndexedPolicyReconciler<'a> {
    iam: &'a dyn IamClient,
    role_name: String,
    naming: PolicyNaming,
    config: &'a PolicyConfig,
}

impl<'a> IndexedPolicyReconciler<'a> {
    pub fn new(
        iam: &'a dyn IamClient,
        role_name: impl Into<String>,
        naming: PolicyNaming,
        config: &'a PolicyConfig,
    ) -> Self {
        Self {
            iam,
            role_name: role_name.into(),
            naming,
            config,
        }
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub fn naming(&self) -> &PolicyNaming {
        &self.naming
    }

    async fn call<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = CloudResult<T>>,
    ) -> Result<T> {
        bounded(self.config.call_timeout, operation, call).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// `(index, name)` of every existing share policy, by index.
    pub async fn policy_names(&self) -> Result<Vec<(usize, String)>> {
        let names = self
            .call("iam:ListPolicies", self.iam.list_policies(self.naming.base()))
            .await?;
        let mut owned: Vec<(usize, String)> = names
            .into_iter()
            .filter_map(|name| self.naming.parse_index(&name).map(|i| (i, name)))
            .collect();
        owned.sort();
        owned.dedup();
        Ok(owned)
    }

    /// Read every share policy without changing anything.
    pub async fn observe(&self) -> Result<PolicySet> {
        let mut set = PolicySet::new();
        for (index, name) in self.policy_names().await? {
            if let Some(document) = self.call("iam:GetPolicy", self.iam.get_policy(&name)).await? {
                set.insert(index, document);
            }
        }
        Ok(set)
    }

    /// Read every share policy, converting earlier layouts first.
    ///
    /// A leftover unindexed managed policy is always converted, which also
    /// finishes a conversion that stopped halfway. Legacy inline policies are
    /// only migrated while the role has no share policy at all.
    pub async fn discover(&self) -> Result<PolicySet> {
        let set = self.observe().await?;
        if self.migrate_unindexed(&set).await? {
            return self.observe().await;
        }
        if set.is_empty() && self.migrate_inline().await? {
            return self.observe().await;
        }
        Ok(set)
    }

    async fn migrate_unindexed(&self, current: &PolicySet) -> Result<bool> {
        let old_name = self.naming.unindexed();
        let old = self
            .call("iam:GetPolicy", self.iam.get_policy(old_name))
            .await?;
        let Some(old) = old else { return Ok(false) };

        let old = PolicySet::from_documents([(0, old)]);
        let mut statements = Vec::new();
        for family in share_families() {
            let resources = old.aggregate(&family);
            statements.extend(split_resources(&family, &resources, self.config.size_limits())?);
        }
        let documents = self.layout(statements)?;
        self.check_capacity(documents.len()).await?;

        for (index, document) in documents.iter().enumerate() {
            let name = self.naming.indexed(index);
            if current.get(index).is_some() {
                self.call("iam:CreatePolicyVersion", self.iam.put_policy(&name, document))
                    .await?;
            } else {
                self.call("iam:CreatePolicy", self.iam.create_policy(&name, document))
                    .await?;
            }
        }

        let attached = self.attached_policies().await?;
        if attached.iter().any(|name| name == old_name) {
            self.call("iam:DetachRolePolicy", self.iam.detach_policy(&self.role_name, old_name))
                .await?;
        }
        self.call("iam:DeletePolicy", self.iam.delete_policy(old_name)).await?;
        for index in 0..documents.len() {
            let name = self.naming.indexed(index);
            if !attached.contains(&name) {
                self.call("iam:AttachRolePolicy", self.iam.attach_policy(&self.role_name, &name))
                    .await?;
            }
        }

        info!(
            role = %self.role_name,
            policy = old_name,
            documents = documents.len(),
            "converted unindexed share policy"
        );
        Ok(true)
    }

    async fn migrate_inline(&self) -> Result<bool> {
        let limits = self.config.size_limits();
        let mut statements = Vec::new();
        let mut migrated = Vec::new();

        for (policy_name, base) in LEGACY_INLINE_POLICIES {
            let legacy = self
                .call(
                    "iam:GetRolePolicy",
                    self.iam.get_inline_policy(&self.role_name, policy_name),
                )
                .await?;
            let Some(legacy) = legacy else { continue };

            let resources_of = |i: usize| -> Vec<String> {
                legacy
                    .statements
                    .get(i)
                    .map(|s| s.resources.0.clone())
                    .unwrap_or_default()
            };
            statements.extend(split_resources(&StatementFamily::s3(base), &resources_of(0), limits)?);
            statements.extend(split_resources(&StatementFamily::kms(base), &resources_of(1), limits)?);
            migrated.push(*policy_name);
        }

        if migrated.is_empty() {
            return Ok(false);
        }

        let documents = self.layout(statements)?;
        self.check_capacity(documents.len()).await?;
        for (index, document) in documents.iter().enumerate() {
            let name = self.naming.indexed(index);
            self.call("iam:CreatePolicy", self.iam.create_policy(&name, document))
                .await?;
            self.call("iam:AttachRolePolicy", self.iam.attach_policy(&self.role_name, &name))
                .await?;
        }
        for policy_name in &migrated {
            self.call(
                "iam:DeleteRolePolicy",
                self.iam.delete_inline_policy(&self.role_name, policy_name),
            )
            .await?;
        }

        info!(
            role = %self.role_name,
            legacy = ?migrated,
            documents = documents.len(),
            "migrated legacy inline share policies"
        );
        Ok(true)
    }

    /// Pack statements into documents; an empty layout is one placeholder document.
    fn layout(&self, statements: Vec<Statement>) -> Result<Vec<PolicyDocument>> {
        let mut documents = pack_statements(statements, self.config.size_limits())?;
        if documents.is_empty() {
            documents.push(PolicyDocument::empty());
        }
        Ok(documents)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Add `resources` to `family`, creating documents as needed.
    ///
    /// Fails with `QuotaExceeded` before writing anything if the role cannot
    /// hold the resulting number of documents.
    pub async fn grant(&self, family: &StatementFamily, resources: &[String]) -> Result<()> {
        let set = self.discover().await?;
        let desired = set.granted(family, resources, self.config.size_limits())?;
        let plan = set.plan(desired, self.config.prune_empty_documents);

        self.check_quota(&set, &plan).await?;
        self.apply(family, plan).await
    }

    /// Remove `resources` from `family`. Revoking what is not there is a no-op.
    pub async fn revoke(&self, family: &StatementFamily, resources: &[String]) -> Result<()> {
        let set = self.discover().await?;
        if set.is_empty() {
            debug!(role = %self.role_name, family = family.prefix(), "no share policies to revoke from");
            return Ok(());
        }
        let desired = set.revoked(family, resources, self.config.size_limits())?;
        let plan = set.plan(desired, self.config.prune_empty_documents);
        self.apply(family, plan).await
    }

    /// Attach every share policy that exists but is not attached yet.
    pub async fn ensure_attached(&self) -> Result<()> {
        let attached = self.attached_policies().await?;
        for (_, name) in self.policy_names().await? {
            if !attached.contains(&name) {
                self.call("iam:AttachRolePolicy", self.iam.attach_policy(&self.role_name, &name))
                    .await?;
                info!(role = %self.role_name, policy = %name, "attached share policy");
            }
        }
        Ok(())
    }

    async fn attached_policies(&self) -> Result<Vec<String>> {
        self.call(
            "iam:ListAttachedRolePolicies",
            self.iam.list_attached_policies(&self.role_name),
        )
        .await
    }

    async fn check_quota(&self, set: &PolicySet, plan: &PolicyPlan) -> Result<()> {
        self.check_capacity(set.count_after(plan)).await
    }

    /// Fail unless `needed` share policies fit next to the role's other
    /// attached policies.
    async fn check_capacity(&self, needed: usize) -> Result<()> {
        let quota = self
            .call("servicequotas:GetServiceQuota", self.iam.managed_policy_quota())
            .await?
            .unwrap_or(self.config.default_policy_quota);
        let foreign = self
            .attached_policies()
            .await?
            .iter()
            .filter(|name| !self.naming.owns(name) && name.as_str() != self.naming.unindexed())
            .count();

        if needed + foreign > quota {
            warn!(
                role = %self.role_name,
                needed,
                foreign,
                quota,
                "managed policy quota exceeded"
            );
            return Err(PolicyError::QuotaExceeded {
                role: self.role_name.clone(),
                needed,
                available: quota.saturating_sub(foreign),
                quota,
            });
        }
        Ok(())
    }

    async fn apply(&self, family: &StatementFamily, plan: PolicyPlan) -> Result<()> {
        if plan.is_empty() {
            debug!(role = %self.role_name, family = family.prefix(), "share policies already up to date");
            return Ok(());
        }

        for (index, document) in &plan.updates {
            let name = self.naming.indexed(*index);
            self.call("iam:CreatePolicyVersion", self.iam.put_policy(&name, document))
                .await?;
        }
        for (index, document) in &plan.creates {
            let name = self.naming.indexed(*index);
            self.call("iam:CreatePolicy", self.iam.create_policy(&name, document))
                .await?;
        }
        if !plan.deletes.is_empty() {
            let attached = self.attached_policies().await?;
            for index in &plan.deletes {
                let name = self.naming.indexed(*index);
                if attached.contains(&name) {
                    self.call("iam:DetachRolePolicy", self.iam.detach_policy(&self.role_name, &name))
                        .await?;
                }
                self.call("iam:DeletePolicy", self.iam.delete_policy(&name)).await?;
            }
        }

        info!(
            role = %self.role_name,
            family = family.prefix(),
            created = plan.creates.len(),
            updated = plan.updates.len(),
            deleted = plan.deletes.len(),
            "share policies updated"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Compare deployed policies with `family` granting `resources`.
    ///
    /// Read-only: never migrates, attaches or writes.
    pub async fn verify(&self, family: &StatementFamily, resources: &[String]) -> Result<Vec<Finding>> {
        let role = self.role_name.as_str();
        let names = self.policy_names().await?;
        let mut findings = Vec::new();

        if names.is_empty() {
            findings.push(Finding::missing(role, self.naming.indexed(0)));
        } else {
            let attached = self.attached_policies().await?;
            for (_, name) in &names {
                if !attached.contains(name) {
                    findings.push(Finding::new(
                        FindingKind::PolicyNotAttached,
                        role,
                        name.as_str(),
                        "attached",
                        "detached",
                    ));
                }
            }
        }

        let set = self.observe().await?;
        let drift = family_drift(&set, family, resources);
        if drift.family_missing {
            findings.push(Finding::new(
                FindingKind::MissingStatement,
                role,
                family.prefix(),
                resources.join(", "),
                "absent",
            ));
        }
        if !drift.missing_resources.is_empty() {
            findings.push(Finding::new(
                FindingKind::MissingResources,
                role,
                family.prefix(),
                drift.missing_resources.join(", "),
                "absent",
            ));
        }
        if !drift.duplicate_resources.is_empty() {
            findings.push(Finding::new(
                FindingKind::DuplicateResources,
                role,
                family.prefix(),
                "each resource once",
                drift.duplicate_resources.join(", "),
            ));
        }
        if !drift.missing_actions.is_empty() {
            findings.push(Finding::new(
                FindingKind::MissingActions,
                role,
                family.prefix(),
                drift.missing_actions.join(", "),
                "absent",
            ));
        }
        if !drift.extra_actions.is_empty() {
            findings.push(Finding::new(
                FindingKind::ExtraActions,
                role,
                family.prefix(),
                family.actions().join(", "),
                drift.extra_actions.join(", "),
            ));
        }
        Ok(findings)
    }
}
