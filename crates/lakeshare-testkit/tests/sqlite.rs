//! The engine over the SQLite repository.

use std::path::Path;
use std::sync::Arc;

use lakeshare::core::{
    DatasetId, EnvironmentId, HealthStatus, ItemHealth, ItemKind, PrincipalKind, ResourceId,
    ShareAction, SharePrincipal, ShareItemStatus, ShareStatus,
};
use lakeshare::store::{Repository, SqliteRepository};
use lakeshare::{CloudManagerRegistry, Finding, MemoryLockProvider, ShareEngine};
use lakeshare_testkit::fixtures::{
    test_config, BUCKET, DATASET_ACCOUNT, DATASET_ID, ENVIRONMENT_ID, KEY_ALIAS, PRINCIPAL_ACCOUNT,
    REGION,
};
use lakeshare_testkit::{FixtureRegistry, MemoryCloud, StaticResolver, TableCatalog};

fn engine(path: &Path, tables: Arc<TableCatalog>) -> ShareEngine<SqliteRepository> {
    let config = test_config();
    let principal_cloud = Arc::new(MemoryCloud::new(PRINCIPAL_ACCOUNT, REGION));
    let dataset_cloud = Arc::new(MemoryCloud::new(DATASET_ACCOUNT, REGION));
    dataset_cloud.add_bucket(BUCKET);
    let resolver = StaticResolver::new(
        principal_cloud,
        dataset_cloud,
        lakeshare::policy::DatasetLocation {
            dataset_id: DATASET_ID.to_string(),
            account: DATASET_ACCOUNT.to_string(),
            region: REGION.to_string(),
            bucket: BUCKET.to_string(),
            kms_alias: Some(KEY_ALIAS.to_string()),
        },
    );
    let registry = FixtureRegistry::new(
        CloudManagerRegistry::new(Arc::new(resolver), config.policy.clone()),
        tables,
    );
    let locks = MemoryLockProvider::new(config.lock_timeout, config.lock_poll_interval);
    ShareEngine::new(
        Arc::new(SqliteRepository::open(path).unwrap()),
        Arc::new(registry),
        Arc::new(locks),
        config,
    )
}

#[tokio::test]
async fn test_processed_share_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shares.db");
    let tables = Arc::new(TableCatalog::default());

    let (share_id, item_id) = {
        let engine = engine(&path, tables.clone());
        let share = engine
            .create_share(
                DatasetId::new(DATASET_ID),
                EnvironmentId::new(ENVIRONMENT_ID),
                SharePrincipal::new("team-a", PrincipalKind::Group, "team-a-role"),
                "owner@example.com",
            )
            .await
            .unwrap();
        let item = engine
            .add_item(&share.id, ResourceId::new("orders"), ItemKind::Table)
            .await
            .unwrap();
        engine.apply(&share.id, ShareAction::Submit).await.unwrap();
        engine.apply(&share.id, ShareAction::Approve).await.unwrap();
        let report = engine.process_approved(&share.id).await.unwrap();
        assert!(report.is_success());
        (share.id, item.id)
    };

    let engine = engine(&path, tables);
    assert_eq!(engine.share(&share_id).await.unwrap().status, ShareStatus::Processed);
    let item = engine.item(&item_id).await.unwrap();
    assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(item.health.status, HealthStatus::Healthy);
    assert!(item.health.last_verification_time.is_some());

    // The live share is found again instead of being duplicated.
    let again = engine
        .create_share(
            DatasetId::new(DATASET_ID),
            EnvironmentId::new(ENVIRONMENT_ID),
            SharePrincipal::new("team-a", PrincipalKind::Group, "team-a-role"),
            "someone-else",
        )
        .await
        .unwrap();
    assert_eq!(again.id, share_id);
}

#[tokio::test]
async fn test_unhealthy_message_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shares.db");
    let tables = Arc::new(TableCatalog::default());
    tables.set_failing(true);

    let engine = engine(&path, tables);
    let share = engine
        .create_share(
            DatasetId::new(DATASET_ID),
            EnvironmentId::new(ENVIRONMENT_ID),
            SharePrincipal::new("team-a", PrincipalKind::Group, "team-a-role"),
            "owner",
        )
        .await
        .unwrap();
    let item = engine
        .add_item(&share.id, ResourceId::new("orders"), ItemKind::Table)
        .await
        .unwrap();
    engine.apply(&share.id, ShareAction::Submit).await.unwrap();
    engine.apply(&share.id, ShareAction::Approve).await.unwrap();
    engine.process_approved(&share.id).await.unwrap();

    let stored = engine.repository().get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ShareItemStatus::ShareFailed);
    assert_eq!(stored.health.status, HealthStatus::Unhealthy);

    // Health as exchanged with callers.
    let json = serde_json::to_string(&stored.health).unwrap();
    let parsed: ItemHealth = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, stored.health);
}

#[test]
fn test_findings_serialize_with_kind() {
    let finding = Finding::missing("arn:aws:iam::111111111111:role/team-a-role", "policy-0");
    let value = serde_json::to_value(&finding).unwrap();
    assert_eq!(value["kind"], "ResourceMissing");
    assert_eq!(value["resource"], "policy-0");
}
