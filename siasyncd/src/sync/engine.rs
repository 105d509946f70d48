use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use sia_core::{ApiErrorKind, RenterDownload, SiaClient, SiaError};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::paths::{PathError, cloud_path_for, conflict_copy_name, local_path_for, logical_name, staging_path_for};
use super::reconciler::{Action, decide, group_current, walk_local};
use super::record::{CloudFile, LocalFile, PENDING_STATES, SyncRecord, SyncState};
use super::scheduler::{SyncTask, TaskQueue};
use super::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("api error: {0}")]
    Api(#[from] SiaError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tracked directory on disk.
    pub sync_root: PathBuf,
    /// Private directory for in-flight download staging.
    pub staging_root: PathBuf,
    /// Remote folder prefix all tracked objects live under.
    pub remote_root: String,
    pub data_pieces: u32,
    pub parity_pieces: u32,
    /// Name embedded in conflict copy filenames.
    pub conflict_user: String,
}

/// Owns the three views (remote listing, local walk, record table) and every
/// state transition between them. Shared behind an `Arc` by the periodic
/// cycles, the watcher pump, and the worker pool.
pub struct SyncEngine {
    client: SiaClient,
    store: RecordStore,
    config: EngineConfig,
    queue: TaskQueue,
}

impl SyncEngine {
    pub fn new(client: SiaClient, store: RecordStore, config: EngineConfig, queue: TaskQueue) -> Self {
        Self {
            client,
            store,
            config,
            queue,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One full reconciliation pass: list remote, walk local, classify every
    /// known name, persist the transitions, then enqueue at most one task
    /// per changed record. Returns the number of records acted on.
    pub async fn reconcile_once(&self) -> Result<usize, EngineError> {
        let files = self.client.renter_files().await?;
        let remote = group_current(&files, &self.config.remote_root);
        let local = walk_local(&self.config.sync_root)?;
        let records: HashMap<String, SyncRecord> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let mut names: BTreeSet<&str> = BTreeSet::new();
        names.extend(remote.keys().map(String::as_str));
        names.extend(local.keys().map(String::as_str));
        names.extend(records.keys().map(String::as_str));

        let mut tasks = Vec::new();
        let mut changed = 0usize;
        for name in names {
            let action = decide(remote.get(name), local.get(name), records.get(name));
            if action == Action::Keep {
                continue;
            }
            changed += 1;
            if let Some(task) = self
                .apply(name, action, remote.get(name), local.get(name), records.get(name))
                .await?
            {
                tasks.push(task);
            }
        }

        if changed > 0 {
            // Make the transitions durable before any worker picks them up.
            self.store.commit().await?;
        }
        for task in tasks {
            self.queue.enqueue(task);
        }
        Ok(changed)
    }

    async fn apply(
        &self,
        name: &str,
        action: Action,
        remote: Option<&CloudFile>,
        local: Option<&LocalFile>,
        record: Option<&SyncRecord>,
    ) -> Result<Option<SyncTask>, EngineError> {
        let mut rec = record
            .cloned()
            .unwrap_or_else(|| SyncRecord::new(name, SyncState::Modified));

        match action {
            Action::Keep => Ok(None),
            Action::DropRecord => {
                self.store.delete(name).await?;
                Ok(None)
            }
            Action::Download => {
                rec.state = SyncState::ForDownload;
                if let Some(cloud) = remote {
                    rec.cloud_path = Some(cloud.cloud_path.clone());
                    rec.cloud_size = Some(cloud.size as i64);
                }
                self.store.upsert(&rec).await?;
                Ok(Some(SyncTask::Download {
                    name: name.to_string(),
                }))
            }
            Action::Upload => {
                rec.state = SyncState::ForUpload;
                if let Some(file) = local {
                    rec.local_modified = Some(file.modified);
                }
                self.store.upsert(&rec).await?;
                Ok(Some(SyncTask::Upload {
                    name: name.to_string(),
                }))
            }
            Action::CloudDelete => {
                rec.state = SyncState::ForCloudDelete;
                self.store.upsert(&rec).await?;
                Ok(Some(SyncTask::DeleteCloud {
                    name: name.to_string(),
                }))
            }
            Action::LocalDelete => {
                rec.state = SyncState::ForLocalDelete;
                self.store.upsert(&rec).await?;
                Ok(Some(SyncTask::DeleteLocal {
                    name: name.to_string(),
                }))
            }
            Action::AdoptSynced => {
                rec.state = SyncState::Synced;
                if let Some(file) = local {
                    rec.local_modified = Some(file.modified);
                    rec.local_digest = Some(digest_file(&file.path).await?);
                }
                if let Some(cloud) = remote {
                    rec.cloud_path = Some(cloud.cloud_path.clone());
                    rec.cloud_size = Some(cloud.size as i64);
                }
                self.store.upsert(&rec).await?;
                Ok(None)
            }
        }
    }

    /// Watcher-observed change. Flips the record to MODIFIED; a staged
    /// download keeps its temporary path so the poll task can still turn the
    /// staged content into a conflict copy.
    pub async fn mark_modified(&self, name: &str) -> Result<(), EngineError> {
        let mut record = self
            .store
            .get(name)
            .await?
            .unwrap_or_else(|| SyncRecord::new(name, SyncState::Modified));
        record.state = SyncState::Modified;

        let path = local_path_for(&self.config.sync_root, name)?;
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            record.local_modified = Some(unix_mtime(&meta));
            if let Ok(digest) = digest_file(&path).await {
                record.local_digest = Some(digest);
            }
        }
        self.store.upsert(&record).await?;
        self.store.commit().await?;
        Ok(())
    }

    /// Watcher-observed removal. A record that never reached the cloud is
    /// dropped outright; otherwise it is marked DELETED for the reconciler
    /// to turn into a cloud delete.
    pub async fn mark_removed(&self, name: &str) -> Result<(), EngineError> {
        let Some(mut record) = self.store.get(name).await? else {
            return Ok(());
        };
        // A disappearing download target is the pipeline's own publish
        // traffic, not a user delete.
        if matches!(
            record.state,
            SyncState::ForDownload | SyncState::Downloading
        ) {
            return Ok(());
        }
        if record.cloud_path.is_none() {
            self.store.delete(name).await?;
            return Ok(());
        }
        record.state = SyncState::Deleted;
        self.store.upsert(&record).await?;
        self.store.commit().await?;
        Ok(())
    }

    pub async fn execute(&self, task: SyncTask) -> Result<(), EngineError> {
        match task {
            SyncTask::Upload { name } => self.upload_task(&name).await,
            SyncTask::Download { name } => self.download_task(&name).await,
            SyncTask::DeleteCloud { name } => self.delete_cloud_task(&name).await,
            SyncTask::DeleteLocal { name } => self.delete_local_task(&name).await,
        }
    }

    /// Re-enqueues work that was pending when the process last stopped.
    pub async fn resume_pending(&self) -> Result<usize, EngineError> {
        let pending = self.store.list_in_states(&PENDING_STATES).await?;
        let count = pending.len();
        for record in pending {
            let task = match record.state {
                SyncState::ForUpload => SyncTask::Upload { name: record.name },
                SyncState::ForDownload => SyncTask::Download { name: record.name },
                SyncState::ForCloudDelete => SyncTask::DeleteCloud { name: record.name },
                SyncState::ForLocalDelete => SyncTask::DeleteLocal { name: record.name },
                _ => continue,
            };
            self.queue.enqueue(task);
        }
        Ok(count)
    }

    pub async fn is_synced(&self) -> Result<bool, EngineError> {
        Ok(self.store.is_synced().await?)
    }

    async fn upload_task(&self, name: &str) -> Result<(), EngineError> {
        let Some(mut record) = self.store.get(name).await? else {
            return Ok(());
        };
        if record.state != SyncState::ForUpload {
            return Ok(());
        }

        let path = local_path_for(&self.config.sync_root, name)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            // Vanished since the decision; the next pass re-decides.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let modified = unix_mtime(&meta);
        let digest = digest_file(&path).await?;
        let cloud_path = cloud_path_for(&self.config.remote_root, name, modified);

        // Last validation before committing to the transfer.
        match self.store.get(name).await? {
            Some(current) if current.state == SyncState::ForUpload => {}
            _ => return Ok(()),
        }
        record.state = SyncState::Uploading;
        record.local_modified = Some(modified);
        record.local_digest = Some(digest);
        record.cloud_path = Some(cloud_path.clone());
        record.cloud_size = Some(meta.len() as i64);
        self.store.upsert(&record).await?;
        self.store.commit().await?;

        let source = path.to_string_lossy().to_string();
        let mut result = self
            .client
            .renter_upload(
                &cloud_path,
                &source,
                self.config.data_pieces,
                self.config.parity_pieces,
            )
            .await;
        if let Err(err) = &result
            && err.kind() == ApiErrorKind::Occupied
        {
            // A half-finished earlier attempt holds the path. Clear it and
            // try once more.
            self.client.renter_delete(&cloud_path).await?;
            result = self
                .client
                .renter_upload(
                    &cloud_path,
                    &source,
                    self.config.data_pieces,
                    self.config.parity_pieces,
                )
                .await;
        }

        if let Err(err) = result {
            if let Some(mut current) = self.store.get(name).await?
                && current.state == SyncState::Uploading
            {
                current.state = SyncState::UploadFailed;
                self.store.upsert(&current).await?;
                self.store.commit().await?;
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Settles records whose upload the daemon has accepted, flipping them
    /// to SYNCED once the object is fully redundant. An accepted job can
    /// lag the file listing, so absent entries are left alone.
    pub async fn check_uploads(&self) -> Result<(), EngineError> {
        let uploading = self.store.list_in_states(&[SyncState::Uploading]).await?;
        if uploading.is_empty() {
            return Ok(());
        }
        let files = self.client.renter_files().await?;

        let mut changed = false;
        for record in uploading {
            let Some(cloud_path) = record.cloud_path.as_deref() else {
                continue;
            };
            let Some(file) = files.iter().find(|file| file.siapath == cloud_path) else {
                continue;
            };
            if file.available
                && file.uploadprogress >= 100.0
                && let Some(mut current) = self.store.get(&record.name).await?
                && current.state == SyncState::Uploading
            {
                current.state = SyncState::Synced;
                self.store.upsert(&current).await?;
                changed = true;
            }
        }
        if changed {
            self.store.commit().await?;
        }
        Ok(())
    }

    async fn download_task(&self, name: &str) -> Result<(), EngineError> {
        let Some(mut record) = self.store.get(name).await? else {
            return Ok(());
        };
        if record.state != SyncState::ForDownload {
            return Ok(());
        }
        let Some(cloud_path) = record.cloud_path.clone() else {
            // No tracked remote object; nothing to fetch.
            self.store.delete(name).await?;
            return Ok(());
        };

        tokio::fs::create_dir_all(&self.config.staging_root).await?;
        let staging = staging_path_for(&self.config.staging_root, name, rand::random());
        let staging = staging.to_string_lossy().to_string();

        match self.store.get(name).await? {
            Some(current) if current.state == SyncState::ForDownload => {}
            _ => return Ok(()),
        }
        record.state = SyncState::Downloading;
        record.temporary_path = Some(staging.clone());
        self.store.upsert(&record).await?;
        self.store.commit().await?;

        if let Err(err) = self.client.renter_download(&cloud_path, &staging).await {
            if let Some(mut current) = self.store.get(name).await?
                && current.state == SyncState::Downloading
            {
                current.state = SyncState::DownloadFailed;
                current.temporary_path = None;
                self.store.upsert(&current).await?;
                self.store.commit().await?;
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Resolves every record with a staged download against the daemon's
    /// transfer list: publishes finished fetches, turns concurrent local
    /// edits into conflict copies, and re-arms jobs the daemon lost.
    pub async fn check_downloads(&self) -> Result<(), EngineError> {
        let staged: Vec<SyncRecord> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|record| record.temporary_path.is_some())
            .collect();
        if staged.is_empty() {
            return Ok(());
        }
        let downloads = self.client.renter_downloads().await?;

        for record in staged {
            let Some(temp) = record.temporary_path.clone() else {
                continue;
            };
            let transfer = downloads.iter().find(|download| {
                Some(download.siapath.as_str()) == record.cloud_path.as_deref()
                    && download.destination == temp
            });

            match transfer {
                None => match record.state {
                    // The daemon does not know the job (it restarted).
                    SyncState::Downloading => {
                        let mut rec = record.clone();
                        rec.state = SyncState::ForDownload;
                        rec.temporary_path = None;
                        self.store.upsert(&rec).await?;
                        self.queue.enqueue(SyncTask::Download { name: rec.name });
                    }
                    // The pending task will stage afresh.
                    SyncState::ForDownload => {}
                    // Nothing will ever resolve this staging file.
                    _ => {
                        let mut rec = record.clone();
                        rec.temporary_path = None;
                        self.store.upsert(&rec).await?;
                        let _ = tokio::fs::remove_file(&temp).await;
                    }
                },
                Some(download) if download.has_error() => match record.state {
                    // An error against a not-yet-restarted attempt is stale
                    // output from a previous try with the same destination.
                    SyncState::ForDownload => {}
                    SyncState::Downloading => {
                        eprintln!(
                            "[siasyncd] download failed: name={} err={}",
                            record.name, download.error
                        );
                        let mut rec = record.clone();
                        rec.state = SyncState::DownloadFailed;
                        rec.temporary_path = None;
                        self.store.upsert(&rec).await?;
                        let _ = tokio::fs::remove_file(&temp).await;
                    }
                    _ => {
                        let mut rec = record.clone();
                        rec.temporary_path = None;
                        self.store.upsert(&rec).await?;
                        let _ = tokio::fs::remove_file(&temp).await;
                    }
                },
                Some(download) if download.is_complete() => {
                    self.settle_download(&record.name, &temp, download).await?;
                }
                Some(_) => {} // still transferring
            }
        }
        self.store.commit().await?;
        Ok(())
    }

    /// Publishes one completed staged download, or preserves it as a
    /// conflict copy when the local file won the race.
    async fn settle_download(
        &self,
        name: &str,
        temp: &str,
        download: &RenterDownload,
    ) -> Result<(), EngineError> {
        let Some(record) = self.store.get(name).await? else {
            let _ = tokio::fs::remove_file(temp).await;
            return Ok(());
        };
        let target = local_path_for(&self.config.sync_root, name)?;
        let remote_created = record.cloud_created();
        // A write after the transfer began is a concurrent edit, even if the
        // remote version carries a later creation timestamp.
        let reference = transfer_start(download).or(remote_created);

        let local_won = match record.state {
            // The watcher saw a write while the fetch was in flight.
            SyncState::Modified => true,
            SyncState::Downloading => match (reference, tokio::fs::metadata(&target).await) {
                (Some(started), Ok(meta)) => unix_mtime(&meta) > started,
                _ => false,
            },
            _ => {
                // The record left the pipeline some other way; the staged
                // content has no home.
                let mut rec = record;
                rec.temporary_path = None;
                self.store.upsert(&rec).await?;
                let _ = tokio::fs::remove_file(temp).await;
                return Ok(());
            }
        };

        if local_won {
            let copy_name = conflict_copy_name(
                name,
                &self.config.conflict_user,
                &date_string(OffsetDateTime::now_utc()),
            );
            let copy_path = local_path_for(&self.config.sync_root, &copy_name)?;
            if let Some(parent) = copy_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            move_file(Path::new(temp), &copy_path).await?;
            if let Some(created) = remote_created {
                set_file_mtime(&copy_path, created)?;
            }
            self.store
                .record_conflict(name, &copy_name, OffsetDateTime::now_utc().unix_timestamp())
                .await?;
            let mut rec = record;
            // The surviving local version is the one left to upload.
            rec.state = SyncState::Modified;
            rec.temporary_path = None;
            self.store.upsert(&rec).await?;
            eprintln!("[siasyncd] conflict copy created: {copy_name}");
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        move_file(Path::new(temp), &target).await?;
        if let Some(created) = remote_created {
            set_file_mtime(&target, created)?;
        }
        let digest = digest_file(&target).await?;

        if let Some(mut current) = self.store.get(name).await?
            && current.state == SyncState::Downloading
        {
            current.state = SyncState::Synced;
            current.local_modified = remote_created;
            current.local_digest = Some(digest);
            current.cloud_size = Some(download.filesize as i64);
            current.temporary_path = None;
            self.store.upsert(&current).await?;
        }
        Ok(())
    }

    /// Deletes every remote version of the name, current and historical. A
    /// version already gone counts as deleted.
    async fn delete_cloud_task(&self, name: &str) -> Result<(), EngineError> {
        let Some(record) = self.store.get(name).await? else {
            return Ok(());
        };
        if record.state != SyncState::ForCloudDelete {
            return Ok(());
        }

        let files = self.client.renter_files().await?;
        let versions: Vec<String> = files
            .iter()
            .filter(|file| {
                logical_name(&file.siapath, &self.config.remote_root).as_deref() == Some(name)
            })
            .map(|file| file.siapath.clone())
            .collect();
        for siapath in versions {
            match self.client.renter_delete(&siapath).await {
                Ok(()) => {}
                Err(err) if err.kind() == ApiErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        // The file may have reappeared locally while we deleted; only drop
        // the record if nothing moved it on.
        match self.store.get(name).await? {
            Some(current) if current.state == SyncState::ForCloudDelete => {
                self.store.delete(name).await?;
                self.store.commit().await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn delete_local_task(&self, name: &str) -> Result<(), EngineError> {
        let Some(record) = self.store.get(name).await? else {
            return Ok(());
        };
        if record.state != SyncState::ForLocalDelete {
            return Ok(());
        }

        let path = local_path_for(&self.config.sync_root, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        match self.store.get(name).await? {
            Some(current) if current.state == SyncState::ForLocalDelete => {
                self.store.delete(name).await?;
                self.store.commit().await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Unix timestamp of the moment the daemon began a transfer, when reported.
fn transfer_start(download: &RenterDownload) -> Option<i64> {
    let raw = download.starttime.as_deref()?;
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .map(OffsetDateTime::unix_timestamp)
}

fn unix_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn digest_file(path: &Path) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

fn set_file_mtime(path: &Path, timestamp: i64) -> io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64))
}

/// Rename with a copy-then-remove fallback for cross-device moves out of
/// the staging directory.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

fn date_string(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        now.year(),
        u8::from(now.month()),
        now.day()
    )
}

#[cfg(test)]
#[path = "engine_tests/mod.rs"]
mod tests;
