//! # Lakeshare Core
//!
//! Pure primitives for the lakeshare reconciliation core. Nothing in this
//! crate performs I/O.
//!
//! ## Overview
//!
//! - **Transition table**: one action, several `(source, target)` rules,
//!   with re-application treated as a no-op
//! - **State machines**: share-level and item-level, as flat matches over
//!   the transition table
//! - **Policy documents**: a serde model of cloud access policies
//! - **Chunking**: splitting a statement family's resources into indexed,
//!   size-bounded statements and packing them into documents
//! - **Policy sets**: immutable snapshots of a principal's indexed documents,
//!   with pure grant/revoke/plan/drift operations
//!
//! ## Usage
//!
//! ```rust
//! use lakeshare_core::{ShareAction, ShareStatus};
//!
//! let next = ShareAction::Submit.apply(ShareStatus::Draft).unwrap();
//! assert_eq!(next, ShareStatus::Submitted);
//!
//! // Re-applying is a no-op.
//! assert_eq!(ShareAction::Submit.apply(next).unwrap(), ShareStatus::Submitted);
//! ```
//!
//! ```rust
//! use lakeshare_core::{PolicySet, SizeLimits, StatementFamily};
//!
//! let family = StatementFamily::s3("BucketStatement");
//! let set = PolicySet::new();
//! let desired = set
//!     .granted(&family, &["arn:aws:s3:::bucket".to_string()], SizeLimits::default())
//!     .unwrap();
//! let plan = set.plan(desired, false);
//! assert_eq!(plan.creates.len(), 1);
//! ```

pub mod chunking;
pub mod error;
pub mod item;
pub mod policy;
pub mod policy_set;
pub mod share;
pub mod transition;
pub mod types;

pub use chunking::{
    split_resources, pack_statements, SizeLimits, StatementFamily, KMS_ALLOWED_ACTIONS,
    S3_ALLOWED_ACTIONS,
};
pub use error::{CoreError, Result};
pub use item::{ItemHealth, ShareItem, ShareItemAction, ShareItemStatus, ShareableResource};
pub use policy::{Conditions, Effect, PolicyDocument, Principal, Statement, StringList};
pub use policy_set::{family_drift, FamilyDrift, PolicyPlan, PolicySet};
pub use share::{ShareAction, ShareObject, SharePrincipal, ShareStatus};
pub use transition::{Transition, Validity};
pub use types::{
    now_millis, DatasetId, EnvironmentId, HealthStatus, ItemId, ItemKind, PrincipalId,
    PrincipalKind, ResourceId, ShareId,
};
