//! # Lakeshare
//!
//! Share reconciliation for cross-account data access: requests move through
//! two state machines, approved items become cloud policies, and deployed
//! policies can be verified against what was shared at any time.
//!
//! ## Overview
//!
//! - **Shares**: one dataset, one principal, one environment, many items
//! - **State machines**: every status change is a declared transition;
//!   re-applying an action is a no-op
//! - **Reconciliation**: a principal's grants live in indexed, size-bounded
//!   managed policies plus bucket, access point and key policies
//! - **Verification**: drift is reported as findings and recorded as item
//!   health, never raised as an error
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lakeshare::{EngineConfig, ManagerRegistry, MemoryLockProvider, ShareEngine};
//! use lakeshare::core::{DatasetId, EnvironmentId, ItemKind, PrincipalKind, ShareAction, SharePrincipal};
//! use lakeshare::store::SqliteRepository;
//!
//! async fn example(registry: Arc<dyn ManagerRegistry>) {
//!     let config = EngineConfig::default();
//!     let locks = Arc::new(MemoryLockProvider::new(config.lock_timeout, config.lock_poll_interval));
//!     let repo = Arc::new(SqliteRepository::open("shares.db").unwrap());
//!     let engine = ShareEngine::new(repo, registry, locks, config);
//!
//!     let share = engine
//!         .create_share(
//!             DatasetId::new("sales"),
//!             EnvironmentId::new("analytics"),
//!             SharePrincipal::new("team-a", PrincipalKind::Group, "team-a-role"),
//!             "owner@example.com",
//!         )
//!         .await
//!         .unwrap();
//!     engine.add_item(&share.id, "raw".into(), ItemKind::StorageLocation).await.unwrap();
//!     engine.apply(&share.id, ShareAction::Submit).await.unwrap();
//!     engine.apply(&share.id, ShareAction::Approve).await.unwrap();
//!
//!     let report = engine.process_approved(&share.id).await.unwrap();
//!     assert!(report.is_success());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `lakeshare::core` - Entities, state machines, policy documents
//! - `lakeshare::store` - Repository trait, SQLite and in-memory stores
//! - `lakeshare::policy` - Cloud interfaces, reconciler, share managers

pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod registry;

pub use lakeshare_core as core;
pub use lakeshare_policy as policy;
pub use lakeshare_store as store;

pub use config::EngineConfig;
pub use engine::{ProcessReport, ShareEngine};
pub use error::{ErrorKind, Result, ShareError};
pub use lock::{share_lock_resources, LockGuard, LockProvider, MemoryLockProvider};
pub use registry::{CloudManagerRegistry, ManagerRegistry, ShareTarget, TargetResolver};

pub use lakeshare_core::{
    ItemHealth, ItemId, ItemKind, ShareAction, ShareId, ShareItem, ShareItemAction,
    ShareItemStatus, ShareObject, ShareStatus,
};
pub use lakeshare_policy::{Finding, FindingKind, PolicyConfig, ShareManager};
