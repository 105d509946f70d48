use super::*;
use crate::sync::record::{SyncRecord, SyncState};

#[tokio::test]
async fn remote_only_entry_is_scheduled_for_download() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/docs/a.txt/100", 5, true, 100.0)]),
    )
    .await;

    let changed = h.engine.reconcile_once().await.unwrap();

    assert_eq!(changed, 1);
    let record = h.engine.store().get("docs/a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForDownload);
    assert_eq!(record.cloud_path.as_deref(), Some("sync/docs/a.txt/100"));
    assert_eq!(record.cloud_size, Some(5));
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::Download {
            name: "docs/a.txt".into()
        }]
    );
}

#[tokio::test]
async fn local_only_file_is_scheduled_for_upload() {
    let mut h = harness().await;
    mount_files(&h.server, serde_json::json!([])).await;
    write_local(h.sync_dir.path(), "notes.md", b"hello", 1_700_000_000);

    let changed = h.engine.reconcile_once().await.unwrap();

    assert_eq!(changed, 1);
    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForUpload);
    assert_eq!(record.local_modified, Some(1_700_000_000));
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::Upload {
            name: "notes.md".into()
        }]
    );
}

#[tokio::test]
async fn agreeing_views_are_adopted_as_synced() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/notes.md/1700000000", 5, true, 100.0)]),
    )
    .await;
    write_local(h.sync_dir.path(), "notes.md", b"hello", 1_700_000_000);

    h.engine.reconcile_once().await.unwrap();

    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Synced);
    assert!(record.local_digest.is_some());
    assert_eq!(record.cloud_path.as_deref(), Some("sync/notes.md/1700000000"));
    assert!(drain_tasks(&mut h.rx).is_empty());
}

#[tokio::test]
async fn newer_remote_version_replaces_synced_record() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/notes.md/1700000500", 9, true, 100.0)]),
    )
    .await;
    write_local(h.sync_dir.path(), "notes.md", b"old", 1_700_000_000);
    let mut record = SyncRecord::new("notes.md", SyncState::Synced);
    record.cloud_path = Some("sync/notes.md/1700000000".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.reconcile_once().await.unwrap();

    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForDownload);
    assert_eq!(record.cloud_path.as_deref(), Some("sync/notes.md/1700000500"));
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::Download {
            name: "notes.md".into()
        }]
    );
}

#[tokio::test]
async fn deleted_record_without_remote_copy_is_dropped() {
    let mut h = harness().await;
    mount_files(&h.server, serde_json::json!([])).await;
    let mut record = SyncRecord::new("gone.txt", SyncState::Deleted);
    record.cloud_path = Some("sync/gone.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.reconcile_once().await.unwrap();

    assert!(h.engine.store().get("gone.txt").await.unwrap().is_none());
    assert!(drain_tasks(&mut h.rx).is_empty());
}

#[tokio::test]
async fn synced_record_with_deleted_local_queues_cloud_delete() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/notes.md/100", 5, true, 100.0)]),
    )
    .await;
    let mut record = SyncRecord::new("notes.md", SyncState::Synced);
    record.cloud_path = Some("sync/notes.md/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.reconcile_once().await.unwrap();

    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForCloudDelete);
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::DeleteCloud {
            name: "notes.md".into()
        }]
    );
}

#[tokio::test]
async fn synced_record_with_deleted_remote_queues_local_delete() {
    let mut h = harness().await;
    mount_files(&h.server, serde_json::json!([])).await;
    write_local(h.sync_dir.path(), "notes.md", b"hello", 100);
    let mut record = SyncRecord::new("notes.md", SyncState::Synced);
    record.cloud_path = Some("sync/notes.md/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.reconcile_once().await.unwrap();

    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForLocalDelete);
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::DeleteLocal {
            name: "notes.md".into()
        }]
    );
}

#[tokio::test]
async fn settled_state_makes_reconcile_a_no_op() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/notes.md/1700000000", 5, true, 100.0)]),
    )
    .await;
    write_local(h.sync_dir.path(), "notes.md", b"hello", 1_700_000_000);

    assert_eq!(h.engine.reconcile_once().await.unwrap(), 1);
    assert_eq!(h.engine.reconcile_once().await.unwrap(), 0);
    assert_eq!(h.engine.reconcile_once().await.unwrap(), 0);
    assert!(drain_tasks(&mut h.rx).is_empty());
}

#[tokio::test]
async fn transfer_owned_record_is_never_touched() {
    let mut h = harness().await;
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/notes.md/900", 5, true, 100.0)]),
    )
    .await;
    write_local(h.sync_dir.path(), "notes.md", b"hello", 100);
    let mut record = SyncRecord::new("notes.md", SyncState::Uploading);
    record.cloud_path = Some("sync/notes.md/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    assert_eq!(h.engine.reconcile_once().await.unwrap(), 0);

    let record = h.engine.store().get("notes.md").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Uploading);
    assert!(drain_tasks(&mut h.rx).is_empty());
}
