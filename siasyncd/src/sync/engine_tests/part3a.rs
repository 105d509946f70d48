use super::*;
use crate::sync::record::{SyncRecord, SyncState};
use wiremock::matchers::{method, path_regex, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn download_task_stages_and_requests_the_fetch() {
    let h = harness().await;
    let mut record = SyncRecord::new("docs/a.txt", SyncState::ForDownload);
    record.cloud_path = Some("sync/docs/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"^/renter/download/sync/docs/a\.txt/100$"))
        .and(query_param("async", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine
        .execute(SyncTask::Download {
            name: "docs/a.txt".into(),
        })
        .await
        .unwrap();

    let record = h.engine.store().get("docs/a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Downloading);
    let temp = record.temporary_path.unwrap();
    assert!(temp.starts_with(h.staging_dir.path().to_str().unwrap()));
    assert!(temp.ends_with(".part"));
}

#[tokio::test]
async fn download_task_aborts_when_state_moved_on() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::Synced);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    h.engine
        .execute(SyncTask::Download { name: "a.txt".into() })
        .await
        .unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Synced);
    assert!(record.temporary_path.is_none());
}

#[tokio::test]
async fn rejected_download_settles_as_failed() {
    let h = harness().await;
    let mut record = SyncRecord::new("a.txt", SyncState::ForDownload);
    record.cloud_path = Some("sync/a.txt/100".into());
    h.engine.store().upsert(&record).await.unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"^/renter/download/sync/a\.txt/100$"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({ "message": "no file known" })),
        )
        .mount(&h.server)
        .await;

    let result = h
        .engine
        .execute(SyncTask::Download { name: "a.txt".into() })
        .await;

    assert!(result.is_err());
    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::DownloadFailed);
    assert!(record.temporary_path.is_none());
}

#[tokio::test]
async fn completed_download_is_published_with_remote_timestamp() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("docs_a.txt.00000000000000ab.part");
    std::fs::write(&temp, b"remote content").unwrap();
    let mut record = SyncRecord::new("docs/a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/docs/a.txt/1700000000".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/docs/a.txt/1700000000",
            temp.to_str().unwrap(),
            14,
            14,
            ""
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let target = h.sync_dir.path().join("docs/a.txt");
    assert_eq!(std::fs::read(&target).unwrap(), b"remote content");
    assert_eq!(file_mtime(&target), 1_700_000_000);
    assert!(!temp.exists());

    let record = h.engine.store().get("docs/a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Synced);
    assert_eq!(record.local_modified, Some(1_700_000_000));
    assert_eq!(record.cloud_size, Some(14));
    assert!(record.temporary_path.is_none());
    assert_eq!(
        record.local_digest.as_deref(),
        Some(format!("{:x}", md5::compute(b"remote content")).as_str())
    );
}

#[tokio::test]
async fn transfer_error_fails_the_downloading_record() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("a.txt.00000000000000ab.part");
    std::fs::write(&temp, b"partial").unwrap();
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/100".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/a.txt/100",
            temp.to_str().unwrap(),
            7,
            3,
            "host went offline"
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::DownloadFailed);
    assert!(record.temporary_path.is_none());
    assert!(!temp.exists());
}

#[tokio::test]
async fn stale_transfer_error_is_ignored_for_rearmed_record() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("a.txt.00000000000000ab.part");
    let mut record = SyncRecord::new("a.txt", SyncState::ForDownload);
    record.cloud_path = Some("sync/a.txt/100".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/a.txt/100",
            temp.to_str().unwrap(),
            7,
            0,
            "previous attempt failed"
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForDownload);
}

#[tokio::test]
async fn lost_download_job_is_rearmed() {
    let mut h = harness().await;
    let temp = h.staging_dir.path().join("a.txt.00000000000000ab.part");
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/100".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(&h.server, serde_json::json!([])).await;

    h.engine.check_downloads().await.unwrap();

    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForDownload);
    assert!(record.temporary_path.is_none());
    assert_eq!(
        drain_tasks(&mut h.rx),
        vec![SyncTask::Download { name: "a.txt".into() }]
    );
}

#[tokio::test]
async fn concurrent_local_edit_becomes_a_conflict_copy() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("report.txt.00000000000000ab.part");
    std::fs::write(&temp, b"remote version").unwrap();
    write_local(h.sync_dir.path(), "report.txt", b"local edit", 1_700_000_900);
    let mut record = SyncRecord::new("report.txt", SyncState::Modified);
    record.cloud_path = Some("sync/report.txt/1700000000".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/report.txt/1700000000",
            temp.to_str().unwrap(),
            14,
            14,
            ""
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    // The local edit stays in place; the remote version survives beside it.
    let local = h.sync_dir.path().join("report.txt");
    assert_eq!(std::fs::read(&local).unwrap(), b"local edit");
    let conflicts = h.engine.store().list_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].name, "report.txt");
    let copy = h.sync_dir.path().join(&conflicts[0].copy_name);
    assert_eq!(std::fs::read(&copy).unwrap(), b"remote version");
    assert_eq!(file_mtime(&copy), 1_700_000_000);
    assert!(conflicts[0].copy_name.contains("conflicted copy tester"));

    let record = h.engine.store().get("report.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
    assert!(record.temporary_path.is_none());
}

#[tokio::test]
async fn late_local_write_during_download_also_conflicts() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("a.txt.00000000000000ab.part");
    std::fs::write(&temp, b"remote").unwrap();
    // The local mtime is ahead of the transfer start time.
    write_local(h.sync_dir.path(), "a.txt", b"newer local", 1_700_000_500);
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/1700000000".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/a.txt/1700000000",
            temp.to_str().unwrap(),
            6,
            6,
            ""
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let local = h.sync_dir.path().join("a.txt");
    assert_eq!(std::fs::read(&local).unwrap(), b"newer local");
    assert_eq!(h.engine.store().list_conflicts().await.unwrap().len(), 1);

    // The surviving local copy goes back through the upload path.
    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
    assert!(record.temporary_path.is_none());
}

#[tokio::test]
async fn zero_byte_download_is_published() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("empty.txt.00000000000000ab.part");
    std::fs::write(&temp, b"").unwrap();
    let mut record = SyncRecord::new("empty.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/empty.txt/1700000000".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry(
            "sync/empty.txt/1700000000",
            temp.to_str().unwrap(),
            0,
            0,
            ""
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let target = h.sync_dir.path().join("empty.txt");
    assert_eq!(std::fs::read(&target).unwrap(), b"");
    assert!(!temp.exists());

    let record = h.engine.store().get("empty.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Synced);
    assert_eq!(record.cloud_size, Some(0));
}

#[tokio::test]
async fn edit_after_the_fetch_started_still_conflicts() {
    let h = harness().await;
    let temp = h.staging_dir.path().join("a.txt.00000000000000ab.part");
    std::fs::write(&temp, b"remote").unwrap();
    // The edit predates the remote creation timestamp but landed after the
    // transfer began, so it raced the fetch all the same.
    write_local(h.sync_dir.path(), "a.txt", b"raced edit", 1_700_000_100);
    let mut record = SyncRecord::new("a.txt", SyncState::Downloading);
    record.cloud_path = Some("sync/a.txt/1700000200".into());
    record.temporary_path = Some(temp.to_str().unwrap().to_string());
    h.engine.store().upsert(&record).await.unwrap();
    mount_downloads(
        &h.server,
        serde_json::json!([download_entry_started(
            "sync/a.txt/1700000200",
            temp.to_str().unwrap(),
            6,
            6,
            "",
            "2023-11-14T22:13:20Z"
        )]),
    )
    .await;

    h.engine.check_downloads().await.unwrap();

    let local = h.sync_dir.path().join("a.txt");
    assert_eq!(std::fs::read(&local).unwrap(), b"raced edit");
    assert_eq!(h.engine.store().list_conflicts().await.unwrap().len(), 1);
    let record = h.engine.store().get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::Modified);
    assert!(record.temporary_path.is_none());
}
