use super::*;
use crate::sync::record::{SyncRecord, SyncState};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn cloud_delete_removes_every_version() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::ForCloudDelete);
    record.cloud_path = Some("sync/a.txt/200".into());
    h.engine.store().upsert(&record).await.unwrap();
    mount_files(
        &h.server,
        serde_json::json!([
            file_entry("sync/a.txt/100", 1, true, 100.0),
            file_entry("sync/a.txt/200", 1, true, 100.0),
            file_entry("sync/other.txt/100", 1, true, 100.0),
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/renter/delete/sync/a\.txt/100$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/renter/delete/sync/a\.txt/200$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine
        .execute(SyncTask::DeleteCloud { name: "a.txt".into() })
        .await
        .unwrap();

    assert!(h.engine.store().get("a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn cloud_delete_tolerates_already_missing_versions() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::ForCloudDelete);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/a.txt/100", 1, true, 100.0)]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/renter/delete/"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({ "message": "unknown path" })),
        )
        .mount(&h.server)
        .await;

    h.engine
        .execute(SyncTask::DeleteCloud { name: "a.txt".into() })
        .await
        .unwrap();

    assert!(h.engine.store().get("a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn cloud_delete_aborts_if_the_file_came_back() {
    let h = harness().await;
    h.engine
        .store()
        .upsert(&SyncRecord::new("a.txt", SyncState::Modified))
        .await
        .unwrap();

    h.engine
        .execute(SyncTask::DeleteCloud { name: "a.txt".into() })
        .await
        .unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
}

#[tokio::test]
async fn local_delete_removes_file_and_record() {
    let h = harness().await;
    let path = write_local(h.sync_dir.path(), "docs/a.txt", b"x", 100);
    h.engine
        .store()
        .upsert(&SyncRecord::new("docs/a.txt", SyncState::ForLocalDelete))
        .await
        .unwrap();

    h.engine
        .execute(SyncTask::DeleteLocal {
            name: "docs/a.txt".into(),
        })
        .await
        .unwrap();

    assert!(!path.exists());
    assert!(h.engine.store().get("docs/a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn local_delete_of_missing_file_still_settles() {
    let h = harness().await;
    h.engine
        .store()
        .upsert(&SyncRecord::new("gone.txt", SyncState::ForLocalDelete))
        .await
        .unwrap();

    h.engine
        .execute(SyncTask::DeleteLocal {
            name: "gone.txt".into(),
        })
        .await
        .unwrap();

    assert!(h.engine.store().get("gone.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn resume_reenqueues_every_pending_record() {
    let mut h = harness().await;
    for (name, state) in [
        ("up.txt", SyncState::ForUpload),
        ("down.txt", SyncState::ForDownload),
        ("cdel.txt", SyncState::ForCloudDelete),
        ("ldel.txt", SyncState::ForLocalDelete),
        ("done.txt", SyncState::Synced),
        ("failed.txt", SyncState::UploadFailed),
    ] {
        h.engine
            .store()
            .upsert(&SyncRecord::new(name, state))
            .await
            .unwrap();
    }

    let resumed = h.engine.resume_pending().await.unwrap();

    assert_eq!(resumed, 4);
    let tasks = drain_tasks(&mut h.rx);
    assert!(tasks.contains(&SyncTask::Upload { name: "up.txt".into() }));
    assert!(tasks.contains(&SyncTask::Download {
        name: "down.txt".into()
    }));
    assert!(tasks.contains(&SyncTask::DeleteCloud {
        name: "cdel.txt".into()
    }));
    assert!(tasks.contains(&SyncTask::DeleteLocal {
        name: "ldel.txt".into()
    }));
    assert_eq!(tasks.len(), 4);
}

#[tokio::test]
async fn mark_modified_keeps_a_staged_download() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/100".into());
    record.temporary_path = Some("/tmp/a.part".into());
    h.engine.store().upsert(&record).await.unwrap();
    write_local(h.sync_dir.path(), "a.txt", b"edited", 1_700_000_000);

    h.engine.mark_modified("a.txt").await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
    assert_eq!(record.temporary_path.as_deref(), Some("/tmp/a.part"));
    assert_eq!(record.local_modified, Some(1_700_000_000));
}

#[tokio::test]
async fn mark_modified_tracks_an_unknown_name() {
    let h = harness().await;
    write_local(h.sync_dir.path(), "new.txt", b"x", 100);

    h.engine.mark_modified("new.txt").await.unwrap();

    let record = h.engine.store().get("new.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
    assert_eq!(record.local_modified, Some(100));
}

#[tokio::test]
async fn mark_removed_drops_records_that_never_reached_the_cloud() {
    let h = harness().await;
    h.engine
        .store()
        .upsert(&SyncRecord::new("draft.txt", SyncState::Modified))
        .await
        .unwrap();

    h.engine.mark_removed("draft.txt").await.unwrap();

    assert!(h.engine.store().get("draft.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn mark_removed_flags_uploaded_records_deleted() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Synced);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.mark_removed("a.txt").await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Deleted);
}

#[tokio::test]
async fn mark_removed_ignores_in_flight_download_targets() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/100".into());
    record.temporary_path = Some("/tmp/a.part".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine.mark_removed("a.txt").await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Downloading);
}

#[tokio::test]
async fn mark_removed_of_untracked_name_is_a_no_op() {
    let h = harness().await;
    h.engine.mark_removed("unknown.txt").await.unwrap();
    assert!(h.engine.store().get("unknown.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn is_synced_reflects_outstanding_work() {
    let h = harness().await;
    assert!(h.engine.is_synced().await.unwrap());

    h.engine
        .store()
        .upsert(&SyncRecord::new("a.txt", SyncState::ForUpload))
        .await
        .unwrap();
    assert!(!h.engine.is_synced().await.unwrap());

    let mut record = SyncRecord::new("a.txt", SyncState::Synced);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();
    assert!(h.engine.is_synced().await.unwrap());
}
