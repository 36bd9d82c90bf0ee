//! # Lakeshare Policy
//!
//! Cloud-facing half of the reconciliation core: keeps a principal's
//! indexed managed policies, bucket policies, access point policies and key
//! policies in line with what has been shared.
//!
//! ## Key Types
//!
//! - [`IamClient`], [`S3Client`], [`KmsClient`] - Cloud interfaces, one call per method
//! - [`IndexedPolicyReconciler`] - Discover, aggregate, re-chunk and write back
//!   a role's indexed share policies
//! - [`ShareManager`] - Grant, revoke and check one resource for one principal
//! - [`AccessPointShareManager`] / [`BucketShareManager`] - The two resource kinds
//! - [`Finding`] - One observed deviation from the desired state
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lakeshare_policy::{
//!     AccessPointShareManager, AccessPointTarget, CloudClients, DatasetLocation,
//!     PolicyConfig, PrincipalContext, ShareManager,
//! };
//!
//! async fn example(clients: CloudClients) {
//!     let manager = AccessPointShareManager::new(
//!         clients,
//!         PrincipalContext {
//!             principal_id: "team-a".into(),
//!             role_name: "team-a-role".into(),
//!             account: "222222222222".into(),
//!             environment_id: "env-1".into(),
//!             resource_prefix: "dataall".into(),
//!         },
//!         AccessPointTarget {
//!             location: DatasetLocation {
//!                 dataset_id: "sales".into(),
//!                 account: "111111111111".into(),
//!                 region: "eu-west-1".into(),
//!                 bucket: "sales-bucket".into(),
//!                 kms_alias: Some("sales-key".into()),
//!             },
//!             prefix: "raw".into(),
//!         },
//!         PolicyConfig::default(),
//!     );
//!     manager.grant().await.unwrap();
//!     assert!(manager.check().await.unwrap().is_empty());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Read, compute, write**: every operation re-reads the documents it
//!   touches, so re-running after a crash converges
//! - **Bounded calls**: each cloud call runs under `call_timeout`; nothing is
//!   retried here
//! - **Findings are data**: `check` and `verify` return lists, never errors,
//!   for drift

pub mod cloud;
pub mod config;
pub mod error;
pub mod findings;
pub mod managers;
pub mod naming;
pub mod reconciler;
pub mod verifier;

pub use cloud::{bounded, CloudClients, CloudResult, IamClient, KmsClient, S3Client};
pub use config::{PolicyConfig, DEFAULT_POLICY_QUOTA};
pub use error::{CloudError, PolicyError, Result};
pub use findings::{findings_message, Finding, FindingKind};
pub use managers::{
    AccessPointShareManager, AccessPointTarget, BucketShareManager, BucketTarget,
    DatasetLocation, PrincipalContext, ShareManager,
};
pub use naming::PolicyNaming;
pub use reconciler::{
    IndexedPolicyReconciler, ACCESS_POINT_STATEMENT_BASE, BUCKET_STATEMENT_BASE,
    LEGACY_ACCESS_POINT_INLINE_POLICY, LEGACY_BUCKET_INLINE_POLICY,
};
pub use verifier::{health_from_findings, HealthVerifier};
