use super::*;
use crate::sync::record::{SyncRecord, SyncState};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn upload_task_commits_and_posts_the_file() {
    let h = harness().await;
    let local = write_local(h.sync_dir.path(), "docs/a.txt", b"payload", 1_700_000_000);
    h.engine
        .store()
        .upsert(&SyncRecord::new("docs/a.txt", SyncState::ForUpload))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/renter/upload/sync/docs/a.txt/1700000000"))
        .and(query_param("source", local.to_str().unwrap()))
        .and(query_param("datapieces", "10"))
        .and(query_param("paritypieces", "20"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine
        .execute(SyncTask::Upload {
            name: "docs/a.txt".into(),
        })
        .await
        .unwrap();

    let record = h.engine.store().get("docs/a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Uploading);
    assert_eq!(record.cloud_path.as_deref(), Some("sync/docs/a.txt/1700000000"));
    assert_eq!(record.local_modified, Some(1_700_000_000));
    assert_eq!(record.cloud_size, Some(7));
    assert_eq!(
        record.local_digest.as_deref(),
        Some(format!("{:x}", md5::compute(b"payload")).as_str())
    );
}

#[tokio::test]
async fn upload_task_aborts_when_state_moved_on() {
    let h = harness().await;
    write_local(h.sync_dir.path(), "a.txt", b"x", 100);
    let mut record = SyncRecord::new("a.txt", SyncState::Modified);
    record.local_modified = Some(100);
    h.engine.store().upsert(&record).await.unwrap();

    // No upload mock mounted: a request would fail the task.
    h.engine
        .execute(SyncTask::Upload { name: "a.txt".into() })
        .await
        .unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
}

#[tokio::test]
async fn upload_task_skips_vanished_local_file() {
    let h = harness().await;
    h.engine
        .store()
        .upsert(&SyncRecord::new("ghost.txt", SyncState::ForUpload))
        .await
        .unwrap();

    h.engine
        .execute(SyncTask::Upload {
            name: "ghost.txt".into(),
        })
        .await
        .unwrap();

    let record = h.engine.store().get("ghost.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForUpload);
}

#[tokio::test]
async fn occupied_remote_path_is_cleared_and_retried() {
    let h = harness().await;
    write_local(h.sync_dir.path(), "a.txt", b"x", 100);
    h.engine
        .store()
        .upsert(&SyncRecord::new("a.txt", SyncState::ForUpload))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/renter/upload/sync/a.txt/100"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "message": "upload failed: a file already exists at that location"
        })))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/renter/delete/sync/a.txt/100"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/renter/upload/sync/a.txt/100"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine
        .execute(SyncTask::Upload { name: "a.txt".into() })
        .await
        .unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Uploading);
}

#[tokio::test]
async fn rejected_upload_settles_as_failed() {
    let h = harness().await;
    write_local(h.sync_dir.path(), "a.txt", b"x", 100);
    h.engine
        .store()
        .upsert(&SyncRecord::new("a.txt", SyncState::ForUpload))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/renter/upload/sync/a.txt/100"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({ "message": "not enough hosts" })),
        )
        .mount(&h.server)
        .await;

    let result = h
        .engine
        .execute(SyncTask::Upload { name: "a.txt".into() })
        .await;

    assert!(result.is_err());
    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::UploadFailed);
}

#[tokio::test]
async fn check_uploads_settles_fully_redundant_files() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Uploading);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/a.txt/100", 1, true, 100.0)]),
    )
    .await;

    h.engine.check_uploads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Synced);
}

#[tokio::test]
async fn check_uploads_waits_while_redundancy_builds() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Uploading);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();
    mount_files(
        &h.server,
        serde_json::json!([file_entry("sync/a.txt/100", 1, false, 42.5)]),
    )
    .await;

    h.engine.check_uploads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Uploading);
}

#[tokio::test]
async fn check_uploads_leaves_listing_absent_jobs_running() {
    // An accepted upload can take a beat to appear in /renter/files.
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Uploading);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();
    mount_files(&h.server, serde_json::json!([])).await;

    h.engine.check_uploads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Uploading);
}
