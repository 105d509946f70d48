use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use sia_core::SiaClient;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::sync::engine::{EngineConfig, SyncEngine};
use crate::sync::scheduler::{SyncTask, TaskQueue};
use crate::sync::store::RecordStore;

mod part1;
mod part2;
mod part3a;
mod part3b;

pub struct Harness {
    pub server: MockServer,
    pub engine: SyncEngine,
    pub rx: UnboundedReceiver<SyncTask>,
    pub sync_dir: TempDir,
    pub staging_dir: TempDir,
}

pub async fn harness() -> Harness {
    let server = MockServer::start().await;
    let client = SiaClient::with_base_url(&server.uri(), None).unwrap();
    let store = RecordStore::in_memory().await.unwrap();
    let (queue, rx) = TaskQueue::new();
    let sync_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        sync_root: sync_dir.path().to_path_buf(),
        staging_root: staging_dir.path().to_path_buf(),
        remote_root: "sync".into(),
        data_pieces: 10,
        parity_pieces: 20,
        conflict_user: "tester".into(),
    };
    let engine = SyncEngine::new(client, store, config, queue);
    Harness {
        server,
        engine,
        rx,
        sync_dir,
        staging_dir,
    }
}

pub async fn mount_files(server: &MockServer, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/renter/files"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": files })),
        )
        .mount(server)
        .await;
}

pub async fn mount_downloads(server: &MockServer, downloads: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/renter/downloads"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "downloads": downloads })),
        )
        .mount(server)
        .await;
}

pub fn file_entry(siapath: &str, filesize: u64, available: bool, progress: f64) -> serde_json::Value {
    serde_json::json!({
        "siapath": siapath,
        "filesize": filesize,
        "available": available,
        "uploadprogress": progress,
    })
}

pub fn download_entry(
    siapath: &str,
    destination: &str,
    filesize: u64,
    received: u64,
    error: &str,
) -> serde_json::Value {
    // 2023-11-14T22:13:20Z = unix 1_700_000_000.
    download_entry_started(
        siapath,
        destination,
        filesize,
        received,
        error,
        "2023-11-14T22:13:20Z",
    )
}

pub fn download_entry_started(
    siapath: &str,
    destination: &str,
    filesize: u64,
    received: u64,
    error: &str,
    starttime: &str,
) -> serde_json::Value {
    serde_json::json!({
        "siapath": siapath,
        "destination": destination,
        "filesize": filesize,
        "received": received,
        "starttime": starttime,
        "error": error,
    })
}

/// Writes a file under `root` with an explicit unix mtime.
pub fn write_local(root: &Path, name: &str, contents: &[u8], mtime: i64) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime as u64))
        .unwrap();
    path
}

pub fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn drain_tasks(rx: &mut UnboundedReceiver<SyncTask>) -> Vec<SyncTask> {
    let mut tasks = Vec::new();
    while let Ok(task) = rx.try_recv() {
        tasks.push(task);
    }
    tasks
}
