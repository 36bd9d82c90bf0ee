//! An in-memory cloud implementing every cloud interface.
//!
//! Behaves like the real services where the engine can tell the difference:
//! duplicate creates and writes to missing entities fail, documents over the
//! managed policy size limit are rejected, policies still attached cannot be
//! deleted and access points can take a few polls to appear.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use lakeshare_core::chunking::DEFAULT_MAX_POLICY_SIZE;
use lakeshare_core::{PolicyDocument, Principal, Statement};
use lakeshare_policy::naming::{access_point_arn, role_arn};
use lakeshare_policy::{CloudError, CloudResult, IamClient, KmsClient, S3Client};

#[derive(Debug, Clone)]
struct AccessPointState {
    bucket: String,
    policy: Option<PolicyDocument>,
    /// Lookups left before the access point reports as available.
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct CloudState {
    next_id: u64,
    /// Role name -> unique role id.
    roles: BTreeMap<String, String>,
    managed: BTreeMap<String, PolicyDocument>,
    attached: BTreeMap<String, BTreeSet<String>>,
    inline: BTreeMap<(String, String), PolicyDocument>,
    quota: Option<usize>,
    buckets: BTreeSet<String>,
    bucket_policies: BTreeMap<String, PolicyDocument>,
    access_points: BTreeMap<String, AccessPointState>,
    access_point_delay: u32,
    key_aliases: BTreeMap<String, String>,
    key_policies: BTreeMap<String, PolicyDocument>,
    failing: BTreeSet<String>,
    writes: usize,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", hex::encode_upper(self.next_id.to_be_bytes()))
    }

    fn check(&self, operation: &str) -> CloudResult<()> {
        if self.failing.contains(operation) {
            return Err(CloudError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

/// One account and region worth of IAM, S3 and KMS.
#[derive(Debug)]
pub struct MemoryCloud {
    account: String,
    region: String,
    state: RwLock<CloudState>,
}

impl MemoryCloud {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            state: RwLock::new(CloudState::default()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn read(&self) -> RwLockReadGuard<'_, CloudState> {
        self.state.read().expect("cloud state poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, CloudState> {
        self.state.write().expect("cloud state poisoned")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a role and return its ARN.
    pub fn add_role(&self, name: &str) -> String {
        let mut state = self.write();
        let id = state.next_id("AROA");
        state.roles.insert(name.to_string(), id);
        role_arn(&self.account, name)
    }

    pub fn delete_role(&self, name: &str) {
        let mut state = self.write();
        state.roles.remove(name);
        state.attached.remove(name);
    }

    pub fn add_bucket(&self, name: &str) {
        self.write().buckets.insert(name.to_string());
    }

    /// Create a key behind `alias` with a root-access policy. Returns the key id.
    pub fn add_key(&self, alias: &str) -> String {
        let mut state = self.write();
        let id = state.next_id("key-");
        let root = format!("arn:aws:iam::{}:root", self.account);
        let policy = PolicyDocument::new(vec![Statement::allow("EnableRootAccess", ["kms:*"], ["*"])
            .with_principal(Principal::aws([root]))]);
        state.key_aliases.insert(alias.to_string(), id.clone());
        state.key_policies.insert(id.clone(), policy);
        id
    }

    /// Attach a managed policy the share engine does not own.
    pub fn attach_foreign_policy(&self, role: &str, name: &str) {
        let mut state = self.write();
        state
            .managed
            .insert(name.to_string(), PolicyDocument::new(Vec::new()));
        state
            .attached
            .entry(role.to_string())
            .or_default()
            .insert(name.to_string());
    }

    pub fn set_quota(&self, quota: Option<usize>) {
        self.write().quota = quota;
    }

    /// New access points report as unavailable for this many lookups.
    pub fn set_access_point_delay(&self, polls: u32) {
        self.write().access_point_delay = polls;
    }

    /// Make every call to `operation` (e.g. `iam:CreatePolicy`) fail.
    pub fn fail(&self, operation: &str) {
        self.write().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.write().failing.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of successful mutating calls so far.
    pub fn writes(&self) -> usize {
        self.read().writes
    }

    pub fn role_id(&self, name: &str) -> Option<String> {
        self.read().roles.get(name).cloned()
    }

    pub fn managed_policy(&self, name: &str) -> Option<PolicyDocument> {
        self.read().managed.get(name).cloned()
    }

    pub fn managed_policy_names(&self) -> Vec<String> {
        self.read().managed.keys().cloned().collect()
    }

    pub fn attached_policies(&self, role: &str) -> Vec<String> {
        self.read()
            .attached
            .get(role)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inline_policy(&self, role: &str, name: &str) -> Option<PolicyDocument> {
        self.read()
            .inline
            .get(&(role.to_string(), name.to_string()))
            .cloned()
    }

    pub fn bucket_policy(&self, bucket: &str) -> Option<PolicyDocument> {
        self.read().bucket_policies.get(bucket).cloned()
    }

    pub fn access_point_exists(&self, name: &str) -> bool {
        self.read().access_points.contains_key(name)
    }

    /// Bucket an access point was created on.
    pub fn access_point_bucket(&self, name: &str) -> Option<String> {
        self.read()
            .access_points
            .get(name)
            .map(|ap| ap.bucket.clone())
    }

    pub fn access_point_policy(&self, name: &str) -> Option<PolicyDocument> {
        self.read()
            .access_points
            .get(name)
            .and_then(|ap| ap.policy.clone())
    }

    pub fn key_policy(&self, key_id: &str) -> Option<PolicyDocument> {
        self.read().key_policies.get(key_id).cloned()
    }

    pub fn key_id(&self, alias: &str) -> Option<String> {
        self.read().key_aliases.get(alias).cloned()
    }

    /// Replace a key policy outside the engine, e.g. to simulate drift.
    pub fn overwrite_key_policy(&self, key_id: &str, policy: PolicyDocument) {
        self.write().key_policies.insert(key_id.to_string(), policy);
    }

    /// Replace a managed policy outside the engine, e.g. to simulate drift.
    pub fn overwrite_managed_policy(&self, name: &str, policy: PolicyDocument) {
        self.write().managed.insert(name.to_string(), policy);
    }
}

fn not_found(operation: &str, what: &str) -> CloudError {
    CloudError::new(operation, format!("NoSuchEntity: {what}"))
}

fn check_size(operation: &str, document: &PolicyDocument) -> CloudResult<()> {
    let size = document.encoded_len();
    if size > DEFAULT_MAX_POLICY_SIZE {
        return Err(CloudError::new(
            operation,
            format!("LimitExceeded: policy is {size} characters"),
        ));
    }
    Ok(())
}

#[async_trait]
impl IamClient for MemoryCloud {
    async fn get_role_arn(&self, role_name: &str) -> CloudResult<Option<String>> {
        let state = self.read();
        state.check("iam:GetRole")?;
        Ok(state
            .roles
            .contains_key(role_name)
            .then(|| role_arn(&self.account, role_name)))
    }

    async fn get_role_id(&self, role_name: &str) -> CloudResult<Option<String>> {
        let state = self.read();
        state.check("iam:GetRole")?;
        Ok(state.roles.get(role_name).cloned())
    }

    async fn list_policies(&self, prefix: &str) -> CloudResult<Vec<String>> {
        let state = self.read();
        state.check("iam:ListPolicies")?;
        Ok(state
            .managed
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_policy(&self, name: &str) -> CloudResult<Option<PolicyDocument>> {
        let state = self.read();
        state.check("iam:GetPolicy")?;
        Ok(state.managed.get(name).cloned())
    }

    async fn create_policy(&self, name: &str, document: &PolicyDocument) -> CloudResult<()> {
        const OP: &str = "iam:CreatePolicy";
        let mut state = self.write();
        state.check(OP)?;
        check_size(OP, document)?;
        if state.managed.contains_key(name) {
            return Err(CloudError::new(OP, format!("EntityAlreadyExists: {name}")));
        }
        state.managed.insert(name.to_string(), document.clone());
        state.writes += 1;
        Ok(())
    }

    async fn put_policy(&self, name: &str, document: &PolicyDocument) -> CloudResult<()> {
        const OP: &str = "iam:CreatePolicyVersion";
        let mut state = self.write();
        state.check(OP)?;
        check_size(OP, document)?;
        let slot = state
            .managed
            .get_mut(name)
            .ok_or_else(|| not_found(OP, name))?;
        *slot = document.clone();
        state.writes += 1;
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> CloudResult<()> {
        const OP: &str = "iam:DeletePolicy";
        let mut state = self.write();
        state.check(OP)?;
        if state.attached.values().any(|names| names.contains(name)) {
            return Err(CloudError::new(OP, format!("DeleteConflict: {name} is attached")));
        }
        state.managed.remove(name).ok_or_else(|| not_found(OP, name))?;
        state.writes += 1;
        Ok(())
    }

    async fn list_attached_policies(&self, role_name: &str) -> CloudResult<Vec<String>> {
        let state = self.read();
        state.check("iam:ListAttachedRolePolicies")?;
        Ok(state
            .attached
            .get(role_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn attach_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()> {
        const OP: &str = "iam:AttachRolePolicy";
        let mut state = self.write();
        state.check(OP)?;
        if !state.roles.contains_key(role_name) {
            return Err(not_found(OP, role_name));
        }
        if !state.managed.contains_key(policy_name) {
            return Err(not_found(OP, policy_name));
        }
        let inserted = state
            .attached
            .entry(role_name.to_string())
            .or_default()
            .insert(policy_name.to_string());
        if inserted {
            state.writes += 1;
        }
        Ok(())
    }

    async fn detach_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()> {
        const OP: &str = "iam:DetachRolePolicy";
        let mut state = self.write();
        state.check(OP)?;
        let removed = state
            .attached
            .get_mut(role_name)
            .map_or(false, |names| names.remove(policy_name));
        if !removed {
            return Err(not_found(OP, policy_name));
        }
        state.writes += 1;
        Ok(())
    }

    async fn managed_policy_quota(&self) -> CloudResult<Option<usize>> {
        let state = self.read();
        state.check("servicequotas:GetServiceQuota")?;
        Ok(state.quota)
    }

    async fn get_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> CloudResult<Option<PolicyDocument>> {
        let state = self.read();
        state.check("iam:GetRolePolicy")?;
        Ok(state
            .inline
            .get(&(role_name.to_string(), policy_name.to_string()))
            .cloned())
    }

    async fn put_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> CloudResult<()> {
        const OP: &str = "iam:PutRolePolicy";
        let mut state = self.write();
        state.check(OP)?;
        if !state.roles.contains_key(role_name) {
            return Err(not_found(OP, role_name));
        }
        state.inline.insert(
            (role_name.to_string(), policy_name.to_string()),
            document.clone(),
        );
        state.writes += 1;
        Ok(())
    }

    async fn delete_inline_policy(&self, role_name: &str, policy_name: &str) -> CloudResult<()> {
        const OP: &str = "iam:DeleteRolePolicy";
        let mut state = self.write();
        state.check(OP)?;
        state
            .inline
            .remove(&(role_name.to_string(), policy_name.to_string()))
            .ok_or_else(|| not_found(OP, policy_name))?;
        state.writes += 1;
        Ok(())
    }
}

#[async_trait]
impl S3Client for MemoryCloud {
    async fn get_bucket_policy(&self, bucket: &str) -> CloudResult<Option<PolicyDocument>> {
        const OP: &str = "s3:GetBucketPolicy";
        let state = self.read();
        state.check(OP)?;
        if !state.buckets.contains(bucket) {
            return Err(CloudError::new(OP, format!("NoSuchBucket: {bucket}")));
        }
        Ok(state.bucket_policies.get(bucket).cloned())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &PolicyDocument) -> CloudResult<()> {
        const OP: &str = "s3:PutBucketPolicy";
        let mut state = self.write();
        state.check(OP)?;
        if !state.buckets.contains(bucket) {
            return Err(CloudError::new(OP, format!("NoSuchBucket: {bucket}")));
        }
        state
            .bucket_policies
            .insert(bucket.to_string(), policy.clone());
        state.writes += 1;
        Ok(())
    }

    async fn get_access_point_arn(&self, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.write();
        state.check("s3:GetAccessPoint")?;
        let Some(access_point) = state.access_points.get_mut(name) else {
            return Ok(None);
        };
        if access_point.pending_polls > 0 {
            access_point.pending_polls -= 1;
            return Ok(None);
        }
        Ok(Some(access_point_arn(&self.region, &self.account, name)))
    }

    async fn create_access_point(&self, bucket: &str, name: &str) -> CloudResult<()> {
        const OP: &str = "s3:CreateAccessPoint";
        let mut state = self.write();
        state.check(OP)?;
        if !state.buckets.contains(bucket) {
            return Err(CloudError::new(OP, format!("NoSuchBucket: {bucket}")));
        }
        if state.access_points.contains_key(name) {
            return Err(CloudError::new(OP, format!("AccessPointAlreadyOwnedByYou: {name}")));
        }
        let pending_polls = state.access_point_delay;
        state.access_points.insert(
            name.to_string(),
            AccessPointState {
                bucket: bucket.to_string(),
                policy: None,
                pending_polls,
            },
        );
        state.writes += 1;
        Ok(())
    }

    async fn get_access_point_policy(&self, name: &str) -> CloudResult<Option<PolicyDocument>> {
        const OP: &str = "s3:GetAccessPointPolicy";
        let state = self.read();
        state.check(OP)?;
        let access_point = state
            .access_points
            .get(name)
            .ok_or_else(|| CloudError::new(OP, format!("NoSuchAccessPoint: {name}")))?;
        Ok(access_point.policy.clone())
    }

    async fn put_access_point_policy(
        &self,
        name: &str,
        policy: &PolicyDocument,
    ) -> CloudResult<()> {
        const OP: &str = "s3:PutAccessPointPolicy";
        let mut state = self.write();
        state.check(OP)?;
        let access_point = state
            .access_points
            .get_mut(name)
            .ok_or_else(|| CloudError::new(OP, format!("NoSuchAccessPoint: {name}")))?;
        access_point.policy = Some(policy.clone());
        state.writes += 1;
        Ok(())
    }
}

#[async_trait]
impl KmsClient for MemoryCloud {
    async fn get_key_id(&self, alias: &str) -> CloudResult<Option<String>> {
        let state = self.read();
        state.check("kms:DescribeKey")?;
        Ok(state.key_aliases.get(alias).cloned())
    }

    async fn get_key_policy(&self, key_id: &str) -> CloudResult<Option<PolicyDocument>> {
        let state = self.read();
        state.check("kms:GetKeyPolicy")?;
        Ok(state.key_policies.get(key_id).cloned())
    }

    async fn put_key_policy(&self, key_id: &str, policy: &PolicyDocument) -> CloudResult<()> {
        const OP: &str = "kms:PutKeyPolicy";
        let mut state = self.write();
        state.check(OP)?;
        let slot = state
            .key_policies
            .get_mut(key_id)
            .ok_or_else(|| not_found(OP, key_id))?;
        *slot = policy.clone();
        state.writes += 1;
        Ok(())
    }
}
