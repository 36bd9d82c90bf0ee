//! SQLite implementation of the Repository trait.
//!
//! This is the durable backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use lakeshare_core::{
    now_millis, DatasetId, EnvironmentId, HealthStatus, ItemHealth, ItemId, PrincipalId,
    ShareId, ShareItem, ShareItemStatus, ShareObject, SharePrincipal, ShareStatus,
    ShareableResource,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Repository;

const SHARE_COLUMNS: &str = "share_id, dataset_id, environment_id, principal_id, principal_kind, \
     principal_role_name, owner, status, created_at, updated_at";

const ITEM_COLUMNS: &str = "item_id, share_id, resource_id, resource_kind, status, \
     health_status, health_message, last_verification_time, created_at, updated_at";

/// Share and item store backed by a single SQLite connection.
///
/// Queries run on tokio's blocking pool behind a mutex.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database file at `path`, migrating it first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database; gone on drop.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("connection mutex: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

struct ShareRow {
    id: String,
    dataset_id: String,
    environment_id: String,
    principal_id: String,
    principal_kind: String,
    role_name: String,
    owner: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

fn read_share_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShareRow> {
    Ok(ShareRow {
        id: row.get("share_id")?,
        dataset_id: row.get("dataset_id")?,
        environment_id: row.get("environment_id")?,
        principal_id: row.get("principal_id")?,
        principal_kind: row.get("principal_kind")?,
        role_name: row.get("principal_role_name")?,
        owner: row.get("owner")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl ShareRow {
    fn into_share(self) -> Result<ShareObject> {
        Ok(ShareObject {
            id: ShareId::new(self.id),
            dataset_id: DatasetId::new(self.dataset_id),
            environment_id: EnvironmentId::new(self.environment_id),
            principal: SharePrincipal {
                id: PrincipalId::new(self.principal_id),
                kind: self.principal_kind.parse()?,
                role_name: self.role_name,
            },
            owner: self.owner,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ItemRow {
    id: String,
    share_id: String,
    resource_id: String,
    resource_kind: String,
    status: String,
    health_status: String,
    health_message: Option<String>,
    last_verification_time: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

fn read_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get("item_id")?,
        share_id: row.get("share_id")?,
        resource_id: row.get("resource_id")?,
        resource_kind: row.get("resource_kind")?,
        status: row.get("status")?,
        health_status: row.get("health_status")?,
        health_message: row.get("health_message")?,
        last_verification_time: row.get("last_verification_time")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl ItemRow {
    fn into_item(self) -> Result<ShareItem> {
        Ok(ShareItem {
            id: ItemId::new(self.id),
            share_id: ShareId::new(self.share_id),
            resource: ShareableResource {
                id: self.resource_id.into(),
                kind: self.resource_kind.parse()?,
            },
            status: self.status.parse()?,
            health: ItemHealth {
                status: self.health_status.parse::<HealthStatus>()?,
                message: self.health_message,
                last_verification_time: self.last_verification_time,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn expect_one(changed: usize, what: String) -> Result<()> {
    if changed == 0 {
        Err(StoreError::NotFound(what))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn insert_share(&self, share: &ShareObject) -> Result<()> {
        let share = share.clone();
        self.run(move |conn| {
            let result = conn.execute(
                &format!("INSERT INTO share_objects ({SHARE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    share.id.as_str(),
                    share.dataset_id.as_str(),
                    share.environment_id.as_str(),
                    share.principal.id.as_str(),
                    share.principal.kind.as_str(),
                    share.principal.role_name,
                    share.owner,
                    share.status.as_str(),
                    share.created_at,
                    share.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::Conflict(format!(
                    "an active share already covers dataset {} for principal {}",
                    share.dataset_id, share.principal.id
                ))),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_share(&self, id: &ShareId) -> Result<Option<ShareObject>> {
        let id = id.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SHARE_COLUMNS} FROM share_objects WHERE share_id = ?1"),
                    params![id.as_str()],
                    read_share_row,
                )
                .optional()?;
            row.map(ShareRow::into_share).transpose()
        })
        .await
    }

    async fn find_active_share(
        &self,
        dataset_id: &DatasetId,
        environment_id: &EnvironmentId,
        principal_id: &PrincipalId,
    ) -> Result<Option<ShareObject>> {
        let (dataset_id, environment_id, principal_id) =
            (dataset_id.clone(), environment_id.clone(), principal_id.clone());
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SHARE_COLUMNS} FROM share_objects
                         WHERE dataset_id = ?1 AND environment_id = ?2 AND principal_id = ?3
                           AND status != ?4"
                    ),
                    params![
                        dataset_id.as_str(),
                        environment_id.as_str(),
                        principal_id.as_str(),
                        ShareStatus::Deleted.as_str(),
                    ],
                    read_share_row,
                )
                .optional()?;
            row.map(ShareRow::into_share).transpose()
        })
        .await
    }

    async fn update_share_status(&self, id: &ShareId, status: ShareStatus) -> Result<()> {
        let id = id.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE share_objects SET status = ?1, updated_at = ?2 WHERE share_id = ?3",
                params![status.as_str(), now_millis(), id.as_str()],
            )?;
            expect_one(changed, format!("share {}", id))
        })
        .await
    }

    async fn insert_item(&self, item: &ShareItem) -> Result<()> {
        let item = item.clone();
        self.run(move |conn| {
            let parent: Option<String> = conn
                .query_row(
                    "SELECT share_id FROM share_objects WHERE share_id = ?1",
                    params![item.share_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if parent.is_none() {
                return Err(StoreError::NotFound(format!("share {}", item.share_id)));
            }

            conn.execute(
                &format!("INSERT INTO share_items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    item.id.as_str(),
                    item.share_id.as_str(),
                    item.resource.id.as_str(),
                    item.resource.kind.as_str(),
                    item.status.as_str(),
                    item.health.status.as_str(),
                    item.health.message,
                    item.health.last_verification_time,
                    item.created_at,
                    item.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<ShareItem>> {
        let id = id.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM share_items WHERE item_id = ?1"),
                    params![id.as_str()],
                    read_item_row,
                )
                .optional()?;
            row.map(ItemRow::into_item).transpose()
        })
        .await
    }

    async fn list_items(
        &self,
        share_id: &ShareId,
        status: Option<ShareItemStatus>,
    ) -> Result<Vec<ShareItem>> {
        let share_id = share_id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM share_items
                 WHERE share_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map(
                    params![share_id.as_str(), status.map(|s| s.as_str())],
                    read_item_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ItemRow::into_item).collect()
        })
        .await
    }

    async fn update_item_status(&self, id: &ItemId, status: ShareItemStatus) -> Result<()> {
        let id = id.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE share_items SET status = ?1, updated_at = ?2 WHERE item_id = ?3",
                params![status.as_str(), now_millis(), id.as_str()],
            )?;
            expect_one(changed, format!("item {}", id))
        })
        .await
    }

    async fn batch_update_item_status(
        &self,
        share_id: &ShareId,
        old: ShareItemStatus,
        new: ShareItemStatus,
    ) -> Result<usize> {
        let share_id = share_id.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE share_items SET status = ?1, updated_at = ?2
                 WHERE share_id = ?3 AND status = ?4",
                params![new.as_str(), now_millis(), share_id.as_str(), old.as_str()],
            )?;
            Ok(changed)
        })
        .await
    }

    async fn update_item_health(&self, id: &ItemId, health: &ItemHealth) -> Result<()> {
        let id = id.clone();
        let health = health.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE share_items
                 SET health_status = ?1, health_message = ?2, last_verification_time = ?3
                 WHERE item_id = ?4",
                params![
                    health.status.as_str(),
                    health.message,
                    health.last_verification_time,
                    id.as_str(),
                ],
            )?;
            expect_one(changed, format!("item {}", id))
        })
        .await
    }

    async fn delete_item(&self, id: &ItemId) -> Result<()> {
        let id = id.clone();
        self.run(move |conn| {
            conn.execute("DELETE FROM share_items WHERE item_id = ?1", params![id.as_str()])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeshare_core::{ItemKind, PrincipalKind};

    fn share(principal: &str) -> ShareObject {
        ShareObject::new(
            DatasetId::new("ds"),
            EnvironmentId::new("env"),
            SharePrincipal::new(principal, PrincipalKind::Group, "team-role"),
            "owner",
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_share() {
        let repo = SqliteRepository::open_memory().unwrap();
        let share = share("team");
        repo.insert_share(&share).await.unwrap();

        let loaded = repo.get_share(&share.id).await.unwrap().unwrap();
        assert_eq!(loaded, share);

        let found = repo
            .find_active_share(&share.dataset_id, &share.environment_id, &share.principal.id)
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some(share.id));
    }

    #[tokio::test]
    async fn test_duplicate_active_share_conflicts() {
        let repo = SqliteRepository::open_memory().unwrap();
        let first = share("team");
        repo.insert_share(&first).await.unwrap();
        assert!(matches!(
            repo.insert_share(&share("team")).await,
            Err(StoreError::Conflict(_))
        ));
        repo.insert_share(&share("other-team")).await.unwrap();
    }

    #[tokio::test]
    async fn test_item_lifecycle() {
        let repo = SqliteRepository::open_memory().unwrap();
        let share = share("team");
        repo.insert_share(&share).await.unwrap();

        let item = ShareItem::new(share.id.clone(), "loc-1", ItemKind::StorageLocation);
        repo.insert_item(&item).await.unwrap();
        assert_eq!(repo.get_item(&item.id).await.unwrap().unwrap(), item);

        repo.update_item_status(&item.id, ShareItemStatus::ShareApproved)
            .await
            .unwrap();
        let approved = repo
            .list_items(&share.id, Some(ShareItemStatus::ShareApproved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert!(repo
            .list_items(&share.id, Some(ShareItemStatus::PendingApproval))
            .await
            .unwrap()
            .is_empty());

        let health = ItemHealth::unhealthy("missing statement", 42);
        repo.update_item_health(&item.id, &health).await.unwrap();
        assert_eq!(repo.get_item(&item.id).await.unwrap().unwrap().health, health);

        repo.delete_item(&item.id).await.unwrap();
        assert!(repo.get_item(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_update() {
        let repo = SqliteRepository::open_memory().unwrap();
        let share = share("team");
        repo.insert_share(&share).await.unwrap();
        for name in ["a", "b"] {
            repo.insert_item(&ShareItem::new(share.id.clone(), name, ItemKind::Table))
                .await
                .unwrap();
        }

        let moved = repo
            .batch_update_item_status(
                &share.id,
                ShareItemStatus::PendingApproval,
                ShareItemStatus::ShareRejected,
            )
            .await
            .unwrap();
        assert_eq!(moved, 2);
    }

    #[tokio::test]
    async fn test_item_requires_share() {
        let repo = SqliteRepository::open_memory().unwrap();
        let orphan = ShareItem::new(ShareId::new("missing"), "t", ItemKind::Table);
        assert!(matches!(
            repo.insert_item(&orphan).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shares.db");
        let share = share("team");
        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.insert_share(&share).await.unwrap();
            repo.update_share_status(&share.id, ShareStatus::Submitted)
                .await
                .unwrap();
        }
        let repo = SqliteRepository::open(&path).unwrap();
        let loaded = repo.get_share(&share.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ShareStatus::Submitted);
    }

    #[tokio::test]
    async fn test_items_listed_in_insertion_order() {
        let repo = SqliteRepository::open_memory().unwrap();
        let share = share("team");
        repo.insert_share(&share).await.unwrap();
        let names = ["raw", "bucket", "orders", "curated", "archive"];
        for name in names {
            let mut item = ShareItem::new(share.id.clone(), name, ItemKind::Table);
            item.created_at = 1_000;
            repo.insert_item(&item).await.unwrap();
        }

        let listed: Vec<String> = repo
            .list_items(&share.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.resource.id.as_str().to_string())
            .collect();
        assert_eq!(listed, names);
    }
}
