use std::path::PathBuf;

use sia_core::RenterFile;

use super::paths::{logical_name, parse_creation_time};
use super::store::StoreError;

/// Per-file synchronization state. Absence of a record means the path is
/// not tracked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Modified,
    ForUpload,
    Uploading,
    UploadFailed,
    ForDownload,
    Downloading,
    DownloadFailed,
    ForCloudDelete,
    ForLocalDelete,
    Deleted,
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Modified => "modified",
            SyncState::ForUpload => "for_upload",
            SyncState::Uploading => "uploading",
            SyncState::UploadFailed => "upload_failed",
            SyncState::ForDownload => "for_download",
            SyncState::Downloading => "downloading",
            SyncState::DownloadFailed => "download_failed",
            SyncState::ForCloudDelete => "for_cloud_delete",
            SyncState::ForLocalDelete => "for_local_delete",
            SyncState::Deleted => "deleted",
            SyncState::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "modified" => Ok(SyncState::Modified),
            "for_upload" => Ok(SyncState::ForUpload),
            "uploading" => Ok(SyncState::Uploading),
            "upload_failed" => Ok(SyncState::UploadFailed),
            "for_download" => Ok(SyncState::ForDownload),
            "downloading" => Ok(SyncState::Downloading),
            "download_failed" => Ok(SyncState::DownloadFailed),
            "for_cloud_delete" => Ok(SyncState::ForCloudDelete),
            "for_local_delete" => Ok(SyncState::ForLocalDelete),
            "deleted" => Ok(SyncState::Deleted),
            "synced" => Ok(SyncState::Synced),
            other => Err(StoreError::InvalidState(other.to_string())),
        }
    }

    /// States owned by a running or pending upload/download pipeline; the
    /// reconciler never touches these.
    pub fn is_transfer_owned(&self) -> bool {
        matches!(
            self,
            SyncState::ForUpload
                | SyncState::Uploading
                | SyncState::ForDownload
                | SyncState::Downloading
        )
    }

    /// Resting states that require no further work until something changes.
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            SyncState::Synced | SyncState::UploadFailed | SyncState::DownloadFailed
        )
    }
}

/// States re-enqueued by the startup resume scan after a restart.
pub const PENDING_STATES: [SyncState; 4] = [
    SyncState::ForUpload,
    SyncState::ForDownload,
    SyncState::ForCloudDelete,
    SyncState::ForLocalDelete,
];

/// The persisted aggregate for one tracked relative path, the single source
/// of truth for every reconciliation decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Relative path with forward-slash separators, unique key.
    pub name: String,
    pub state: SyncState,
    /// Unix mtime of the local copy as last observed.
    pub local_modified: Option<i64>,
    /// MD5 of the local content, used to tell real edits from touches.
    pub local_digest: Option<String>,
    /// Remote object path; its final segment embeds the creation timestamp.
    pub cloud_path: Option<String>,
    pub cloud_size: Option<i64>,
    /// Private staging location of an in-flight download. Set while the
    /// record is FOR_DOWNLOAD/DOWNLOADING, and retained across a MODIFIED
    /// flip until the poll task has resolved the staged transfer.
    pub temporary_path: Option<String>,
}

impl SyncRecord {
    pub fn new(name: impl Into<String>, state: SyncState) -> Self {
        Self {
            name: name.into(),
            state,
            local_modified: None,
            local_digest: None,
            cloud_path: None,
            cloud_size: None,
            temporary_path: None,
        }
    }

    /// Creation timestamp embedded in the tracked cloud path, if any.
    pub fn cloud_created(&self) -> Option<i64> {
        self.cloud_path.as_deref().and_then(parse_creation_time)
    }
}

/// Read-only projection of one current remote object, valid for a single
/// reconciler pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFile {
    pub name: String,
    pub cloud_path: String,
    pub size: u64,
    /// Embedded creation timestamp, the version marker.
    pub created: i64,
    pub available: bool,
    pub upload_progress: f64,
}

impl CloudFile {
    pub fn from_renter_file(file: &RenterFile, remote_root: &str) -> Option<Self> {
        let name = logical_name(&file.siapath, remote_root)?;
        let created = parse_creation_time(&file.siapath)?;
        Some(Self {
            name,
            cloud_path: file.siapath.clone(),
            size: file.filesize,
            created,
            available: file.available,
            upload_progress: file.uploadprogress,
        })
    }

}

/// Read-only projection of one local file, produced by the directory walk.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Unix mtime, second granularity.
    pub modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_storage_form() {
        let states = [
            SyncState::Modified,
            SyncState::ForUpload,
            SyncState::Uploading,
            SyncState::UploadFailed,
            SyncState::ForDownload,
            SyncState::Downloading,
            SyncState::DownloadFailed,
            SyncState::ForCloudDelete,
            SyncState::ForLocalDelete,
            SyncState::Deleted,
            SyncState::Synced,
        ];
        for state in states {
            assert_eq!(SyncState::parse(state.as_str()).unwrap(), state);
        }
        assert!(SyncState::parse("bogus").is_err());
    }

    #[test]
    fn transfer_ownership_covers_pipeline_states_only() {
        assert!(SyncState::ForUpload.is_transfer_owned());
        assert!(SyncState::Downloading.is_transfer_owned());
        assert!(!SyncState::ForCloudDelete.is_transfer_owned());
        assert!(!SyncState::Modified.is_transfer_owned());
        assert!(SyncState::Synced.is_resting());
        assert!(!SyncState::Deleted.is_resting());
    }

    #[test]
    fn cloud_file_from_renter_listing_strips_root_and_timestamp() {
        let file = RenterFile {
            siapath: "sync/docs/a.txt/1700000000".into(),
            available: true,
            filesize: 42,
            uploadprogress: 100.0,
        };
        let cloud = CloudFile::from_renter_file(&file, "sync").unwrap();
        assert_eq!(cloud.name, "docs/a.txt");
        assert_eq!(cloud.created, 1_700_000_000);
        assert_eq!(cloud.size, 42);
    }

    #[test]
    fn cloud_file_rejects_paths_outside_remote_root() {
        let file = RenterFile {
            siapath: "other/docs/a.txt/1700000000".into(),
            available: true,
            filesize: 1,
            uploadprogress: 0.0,
        };
        assert!(CloudFile::from_renter_file(&file, "sync").is_none());
    }

    #[test]
    fn record_exposes_embedded_cloud_timestamp() {
        let mut record = SyncRecord::new("docs/a.txt", SyncState::Synced);
        assert_eq!(record.cloud_created(), None);
        record.cloud_path = Some("sync/docs/a.txt/1700000123".into());
        assert_eq!(record.cloud_created(), Some(1_700_000_123));
    }
}
