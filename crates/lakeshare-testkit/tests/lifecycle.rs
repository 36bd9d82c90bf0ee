//! End-to-end share lifecycles through the engine.

use lakeshare::core::{
    HealthStatus, ItemKind, ResourceId, ShareAction, ShareItemStatus, ShareStatus,
};
use lakeshare::{ErrorKind, FindingKind, ShareError};
use lakeshare_testkit::fixtures::{init_tracing, TestFixture, BUCKET};

#[tokio::test]
async fn test_table_share_lifecycle() {
    init_tracing();
    let fixture = TestFixture::new();
    let engine = &fixture.engine;
    let principal = fixture.principal("team-a");

    let share = engine
        .create_share(
            "sales".into(),
            "analytics".into(),
            principal,
            "owner@example.com",
        )
        .await
        .unwrap();
    assert_eq!(share.status, ShareStatus::Draft);
    let item = engine
        .add_item(&share.id, ResourceId::new("orders"), ItemKind::Table)
        .await
        .unwrap();

    assert_eq!(engine.apply(&share.id, ShareAction::Submit).await.unwrap(), ShareStatus::Submitted);
    assert_eq!(engine.item(&item.id).await.unwrap().status, ShareItemStatus::PendingApproval);

    assert_eq!(engine.apply(&share.id, ShareAction::Approve).await.unwrap(), ShareStatus::Approved);
    assert_eq!(engine.item(&item.id).await.unwrap().status, ShareItemStatus::ShareApproved);

    let report = engine.process_approved(&share.id).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.status, ShareStatus::Processed);
    let granted = engine.item(&item.id).await.unwrap();
    assert_eq!(granted.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(granted.health.status, HealthStatus::Healthy);
    assert!(engine.verify_item(&item.id).await.unwrap().is_empty());

    assert_eq!(
        engine.revoke_items(&share.id, &[item.id.clone()]).await.unwrap(),
        ShareStatus::Revoked
    );
    assert_eq!(engine.item(&item.id).await.unwrap().status, ShareItemStatus::RevokeApproved);

    let report = engine.process_revoked(&share.id).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.status, ShareStatus::Processed);
    assert_eq!(engine.item(&item.id).await.unwrap().status, ShareItemStatus::RevokeSucceeded);

    let findings = engine.verify_item(&item.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, FindingKind::ResourceMissing);
}

#[tokio::test]
async fn test_location_and_bucket_share_lifecycle() {
    init_tracing();
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(
            principal,
            &[("raw", ItemKind::StorageLocation), ("bucket", ItemKind::S3Bucket)],
        )
        .await;

    let report = fixture.engine.process_approved(&share.id).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.succeeded.len(), 2);
    for item in fixture.engine.items(&share.id).await.unwrap() {
        assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
        assert_eq!(item.health.status, HealthStatus::Healthy, "{:?}", item.health.message);
    }

    let ids: Vec<_> = items.iter().map(|i| i.id.clone()).collect();
    fixture.engine.revoke_items(&share.id, &ids).await.unwrap();
    let report = fixture.engine.process_revoked(&share.id).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.status, ShareStatus::Processed);

    for id in &ids {
        let findings = fixture.engine.verify_item(id).await.unwrap();
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingKind::MissingStatement));
    }
    let bucket_policy = fixture.dataset_cloud.bucket_policy(BUCKET).unwrap();
    assert!(bucket_policy.statement("DataAll-Bucket-ReadOnly").is_none());
}

#[tokio::test]
async fn test_revoke_leaves_pending_items_in_draft() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(principal, &[("orders", ItemKind::Table)])
        .await;
    fixture.engine.process_approved(&share.id).await.unwrap();

    // A new item re-opens the processed share; revoking the old one keeps
    // the new request pending.
    let added = fixture
        .engine
        .add_item(&share.id, ResourceId::new("customers"), ItemKind::Table)
        .await
        .unwrap();
    assert_eq!(fixture.engine.share(&share.id).await.unwrap().status, ShareStatus::Draft);

    fixture
        .engine
        .revoke_items(&share.id, &[items[0].id.clone()])
        .await
        .unwrap();
    let report = fixture.engine.process_revoked(&share.id).await.unwrap();
    assert_eq!(report.status, ShareStatus::Draft);
    assert_eq!(
        fixture.engine.item(&added.id).await.unwrap().status,
        ShareItemStatus::PendingApproval
    );
}

#[tokio::test]
async fn test_remove_revoked_items() {
    let mut config = lakeshare_testkit::test_config();
    config.remove_items_after_revoke = true;
    let fixture = TestFixture::with_config(config);
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(principal, &[("orders", ItemKind::Table)])
        .await;
    fixture.engine.process_approved(&share.id).await.unwrap();
    fixture
        .engine
        .revoke_items(&share.id, &[items[0].id.clone()])
        .await
        .unwrap();
    fixture.engine.process_revoked(&share.id).await.unwrap();

    assert!(fixture.engine.items(&share.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_illegal_actions_surface_immediately() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(principal, &[("orders", ItemKind::Table)])
        .await;

    let err = fixture
        .engine
        .apply(&share.id, ShareAction::Submit)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);

    // Not shared yet, so it cannot be revoked.
    let err = fixture
        .engine
        .revoke_items(&share.id, &[items[0].id.clone()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    assert_eq!(fixture.engine.share(&share.id).await.unwrap().status, ShareStatus::Approved);
}

#[tokio::test]
async fn test_delete_refuses_shared_items() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, _) = fixture
        .approved_share(principal, &[("orders", ItemKind::Table)])
        .await;
    fixture.engine.process_approved(&share.id).await.unwrap();

    let err = fixture
        .engine
        .apply(&share.id, ShareAction::Delete)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::ItemsStillShared { count: 1, .. }));
}

#[tokio::test]
async fn test_create_share_returns_live_share() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let first = fixture
        .engine
        .create_share("sales".into(), "analytics".into(), principal.clone(), "a")
        .await
        .unwrap();
    let second = fixture
        .engine
        .create_share("sales".into(), "analytics".into(), principal, "b")
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_duplicate_item_rejected() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let share = fixture
        .engine
        .create_share("sales".into(), "analytics".into(), principal, "owner")
        .await
        .unwrap();
    fixture
        .engine
        .add_item(&share.id, ResourceId::new("orders"), ItemKind::Table)
        .await
        .unwrap();
    let err = fixture
        .engine
        .add_item(&share.id, ResourceId::new("orders"), ItemKind::Table)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::DuplicateItem(_)));
}
