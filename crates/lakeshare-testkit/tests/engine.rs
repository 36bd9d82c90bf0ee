//! Worker flows under lock contention, quota pressure, drift and failures.

use lakeshare::core::{HealthStatus, ItemKind, ShareItemStatus, ShareStatus};
use lakeshare::policy::managers::bucket::BUCKET_KMS_SID;
use lakeshare::{share_lock_resources, ErrorKind, LockProvider, ShareError};
use lakeshare_testkit::fixtures::{init_tracing, TestFixture};

#[tokio::test]
async fn test_lock_held_rolls_share_back() {
    init_tracing();
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(principal, &[("orders", ItemKind::Table)])
        .await;

    let guard = fixture
        .locks
        .acquire(&share_lock_resources(&share))
        .await
        .unwrap();
    let err = fixture.engine.process_approved(&share.id).await.unwrap_err();
    assert!(matches!(err, ShareError::LockUnavailable(_)));
    assert_eq!(err.kind(), ErrorKind::Lock);

    assert_eq!(fixture.engine.share(&share.id).await.unwrap().status, ShareStatus::Approved);
    assert_eq!(
        fixture.engine.item(&items[0].id).await.unwrap().status,
        ShareItemStatus::ShareApproved
    );

    // Once released the same share processes normally.
    drop(guard);
    let report = fixture.engine.process_approved(&share.id).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.status, ShareStatus::Processed);
}

#[tokio::test]
async fn test_quota_exceeded_fails_item() {
    init_tracing();
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    fixture.principal_cloud.set_quota(Some(1));
    fixture
        .principal_cloud
        .attach_foreign_policy(&principal.role_name, "AmazonS3ReadOnlyAccess");

    let (share, items) = fixture
        .approved_share(principal, &[("raw", ItemKind::StorageLocation)])
        .await;
    let report = fixture.engine.process_approved(&share.id).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.status, ShareStatus::Processed);

    let item = fixture.engine.item(&items[0].id).await.unwrap();
    assert_eq!(item.status, ShareItemStatus::ShareFailed);
    assert_eq!(item.health.status, HealthStatus::Unhealthy);
    assert!(item.health.message.is_some());

    let err = fixture.engine.grant_item(&items[0].id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
}

#[tokio::test]
async fn test_drift_detected_and_reapplied() {
    init_tracing();
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(principal, &[("bucket", ItemKind::S3Bucket)])
        .await;
    fixture.engine.process_approved(&share.id).await.unwrap();

    let key_id = fixture.key_id();
    let mut policy = fixture.dataset_cloud.key_policy(&key_id).unwrap();
    policy.remove(BUCKET_KMS_SID);
    fixture.dataset_cloud.overwrite_key_policy(&key_id, policy);

    let results = fixture.engine.verify_share(&share.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1.status, HealthStatus::Unhealthy);
    assert_eq!(
        fixture.engine.item(&items[0].id).await.unwrap().health.status,
        HealthStatus::Unhealthy
    );

    let report = fixture.engine.reapply_share(&share.id).await.unwrap();
    assert_eq!(report.succeeded, vec![items[0].id.clone()]);
    let item = fixture.engine.item(&items[0].id).await.unwrap();
    assert_eq!(item.health.status, HealthStatus::Healthy);
    assert_eq!(item.status, ShareItemStatus::ShareSucceeded);

    // Nothing left to reapply.
    let report = fixture.engine.reapply_share(&share.id).await.unwrap();
    assert!(report.succeeded.is_empty() && report.failed.is_empty());
}

#[tokio::test]
async fn test_verify_item_never_writes() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    let (share, items) = fixture
        .approved_share(
            principal,
            &[("raw", ItemKind::StorageLocation), ("bucket", ItemKind::S3Bucket)],
        )
        .await;
    fixture.engine.process_approved(&share.id).await.unwrap();

    let principal_writes = fixture.principal_cloud.writes();
    let dataset_writes = fixture.dataset_cloud.writes();
    for item in &items {
        assert!(fixture.engine.verify_item(&item.id).await.unwrap().is_empty());
    }
    fixture.engine.verify_share(&share.id).await.unwrap();
    assert_eq!(fixture.principal_cloud.writes(), principal_writes);
    assert_eq!(fixture.dataset_cloud.writes(), dataset_writes);
}

#[tokio::test]
async fn test_failed_item_does_not_block_others() {
    init_tracing();
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    fixture.tables.set_failing(true);
    let (share, _) = fixture
        .approved_share(
            principal,
            &[("orders", ItemKind::Table), ("raw", ItemKind::StorageLocation)],
        )
        .await;

    let report = fixture.engine.process_approved(&share.id).await.unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.status, ShareStatus::Processed);

    for item in fixture.engine.items(&share.id).await.unwrap() {
        let expected = match item.resource.kind {
            ItemKind::Table => ShareItemStatus::ShareFailed,
            _ => ShareItemStatus::ShareSucceeded,
        };
        assert_eq!(item.status, expected);
    }
}

#[tokio::test]
async fn test_cloud_failure_reported_on_item() {
    let fixture = TestFixture::new();
    let principal = fixture.principal("team-a");
    fixture.dataset_cloud.fail("s3:PutBucketPolicy");
    let (share, items) = fixture
        .approved_share(principal, &[("bucket", ItemKind::S3Bucket)])
        .await;

    let report = fixture.engine.process_approved(&share.id).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("s3:PutBucketPolicy"));

    let err = fixture.engine.grant_item(&items[0].id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CloudOperationFailed);

    fixture.dataset_cloud.clear_failures();
    assert!(fixture.engine.grant_item(&items[0].id).await.unwrap().is_empty());
}
