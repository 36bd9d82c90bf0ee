//! # Lakeshare Testkit
//!
//! Testing utilities for lakeshare.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Wire-name transition cases for both state machines
//! - **Generators**: Proptest strategies for statuses, actions and resource lists
//! - **In-memory cloud**: IAM, S3 and KMS behind one [`MemoryCloud`]
//! - **Fixtures**: A share engine wired to two in-memory accounts
//!
//! ## Golden Vectors
//!
//! ```rust
//! use lakeshare_testkit::vectors::verify_all_vectors;
//!
//! for (name, passed, details) in verify_all_vectors() {
//!     assert!(passed, "{name}: {details}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lakeshare_testkit::generators::{existing_set, GrantParams};
//!
//! proptest! {
//!     #[test]
//!     fn grant_never_loses_resources(params: GrantParams) {
//!         let set = existing_set(&params);
//!         let desired = set.granted(&params.family, &params.resources, params.limits).unwrap();
//!         prop_assert!(!desired.is_empty() || params.resources.is_empty());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use lakeshare_testkit::fixtures::TestFixture;
//! use lakeshare::core::ItemKind;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let fixture = TestFixture::new();
//!     let principal = fixture.principal("team-a");
//!     let (share, _) = fixture
//!         .approved_share(principal, &[("raw", ItemKind::StorageLocation)])
//!         .await;
//!     let report = fixture.engine.process_approved(&share.id).await.unwrap();
//!     assert!(report.is_success());
//! });
//! ```

pub mod cloud;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use cloud::MemoryCloud;
pub use fixtures::{init_tracing, test_config, FixtureRegistry, StaticResolver, TableCatalog, TestFixture};
pub use generators::{existing_set, set_from, GrantParams};
pub use vectors::{all_vectors, apply_vector, verify_all_vectors, GoldenVector, Machine};
