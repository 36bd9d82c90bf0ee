//! # Lakeshare Store
//!
//! Persistence for shares and share items behind the [`Repository`] trait,
//! with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Repository`] - The async trait the reconciliation core consumes
//! - [`RepositoryExt`] - Helpers built on top of it
//! - [`SqliteRepository`] - SQLite-based persistent storage
//! - [`MemoryRepository`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lakeshare_core::{DatasetId, EnvironmentId, PrincipalKind, ShareObject, SharePrincipal};
//! use lakeshare_store::{Repository, SqliteRepository};
//!
//! async fn example() {
//!     let repo = SqliteRepository::open("shares.db").unwrap();
//!
//!     let share = ShareObject::new(
//!         DatasetId::new("dataset-1"),
//!         EnvironmentId::new("env-1"),
//!         SharePrincipal::new("team-a", PrincipalKind::Group, "team-a-role"),
//!         "owner@example.com",
//!     );
//!     repo.insert_share(&share).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **One live share per tuple**: inserting a second non-deleted share for
//!   the same dataset, environment and principal returns `Conflict`
//! - **Single-field writes**: each status update is its own statement

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::{Repository, RepositoryExt};
