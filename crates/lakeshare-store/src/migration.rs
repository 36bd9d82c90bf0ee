//! SQLite schema migrations.
//!
//! Migrations are applied in order inside one transaction; version `n` is
//! `MIGRATIONS[n - 1]`. Applied versions are recorded in `schema_migrations`.

use rusqlite::{params, Connection};

use lakeshare_core::now_millis;

use crate::error::{Result, StoreError};

/// v1: shares and items. v2: item health columns.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE share_objects (
        share_id TEXT PRIMARY KEY,
        dataset_id TEXT NOT NULL,
        environment_id TEXT NOT NULL,
        principal_id TEXT NOT NULL,
        principal_kind TEXT NOT NULL,     -- Group | ConsumptionRole
        principal_role_name TEXT NOT NULL,
        owner TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,      -- Unix ms
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE share_items (
        item_id TEXT PRIMARY KEY,
        share_id TEXT NOT NULL REFERENCES share_objects(share_id),
        resource_id TEXT NOT NULL,
        resource_kind TEXT NOT NULL,      -- Table | StorageLocation | S3Bucket
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_share_items_share_status ON share_items(share_id, status);

    -- One live share per (dataset, environment, principal)
    CREATE UNIQUE INDEX idx_share_objects_active
        ON share_objects(dataset_id, environment_id, principal_id)
        WHERE status != 'Deleted';
    "#,
    r#"
    ALTER TABLE share_items ADD COLUMN health_status TEXT NOT NULL DEFAULT 'PendingVerify';
    ALTER TABLE share_items ADD COLUMN health_message TEXT;
    ALTER TABLE share_items ADD COLUMN last_verification_time INTEGER;
    "#,
];

/// Current schema version.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{applied} is newer than supported v{CURRENT_VERSION}"
        )));
    }
    if applied == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        let version = index as u32 + 1;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
    }
    tx.commit()?;
    tracing::debug!(from = applied, to = CURRENT_VERSION, "schema migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"share_objects".to_string()));
        assert!(tables.contains(&"share_items".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 0)",
            params![CURRENT_VERSION + 1],
        )
        .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_partial_unique_index() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let insert = "INSERT INTO share_objects VALUES (?1, 'ds', 'env', 'p', 'Group', 'r', 'o', ?2, 0, 0)";
        conn.execute(insert, params!["a", "Deleted"]).unwrap();
        conn.execute(insert, params!["b", "Draft"]).unwrap();
        assert!(conn.execute(insert, params!["c", "Draft"]).is_err());
    }
}
