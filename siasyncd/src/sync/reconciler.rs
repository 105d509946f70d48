use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sia_core::RenterFile;

use super::paths::name_for_local;
use super::record::{CloudFile, LocalFile, SyncRecord, SyncState};

/// Outcome of classifying one name across the three views. The reconciler
/// applies the action and enqueues at most one pipeline task per name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    Upload,
    CloudDelete,
    LocalDelete,
    /// Remove the record; nothing is left to synchronize.
    DropRecord,
    /// Views already agree; create or settle the record as SYNCED.
    AdoptSynced,
    /// Leave the record untouched.
    Keep,
}

/// Pure decision function for one name given the current remote entry, the
/// local file, and the tracked record. Last-writer-wins with second
/// granularity; remote wins only when strictly newer.
pub fn decide(
    remote: Option<&CloudFile>,
    local: Option<&LocalFile>,
    record: Option<&SyncRecord>,
) -> Action {
    if let Some(rec) = record {
        // Records committed to a transfer belong to their pipeline.
        if rec.state.is_transfer_owned() {
            return Action::Keep;
        }
        // A modified record still holding staged download content is owned
        // by the download poll until the staged copy is resolved.
        if rec.state == SyncState::Modified && rec.temporary_path.is_some() {
            return Action::Keep;
        }
        match rec.state {
            // Pending deletes are re-enqueued; the task re-validates, so a
            // duplicate enqueue is harmless and a lost one is recovered.
            SyncState::ForCloudDelete => return Action::CloudDelete,
            SyncState::ForLocalDelete => return Action::LocalDelete,
            SyncState::Deleted => {
                return if remote.is_some() {
                    Action::CloudDelete
                } else {
                    Action::DropRecord
                };
            }
            _ => {}
        }
    }

    match (remote, local) {
        (None, None) => {
            if record.is_some() {
                Action::DropRecord
            } else {
                Action::Keep
            }
        }
        (Some(cloud), None) => match record.map(|r| r.state) {
            // A remote object still being uploaded elsewhere is not
            // fetchable yet; wait for it to become available.
            None | Some(SyncState::DownloadFailed) if !cloud.available => Action::Keep,
            None => Action::Download,
            // The local copy of a synced file is gone: the user deleted it.
            Some(SyncState::Synced) => Action::CloudDelete,
            Some(SyncState::DownloadFailed) => Action::Download,
            // Never reached SYNCED locally; drop and let the remote entry be
            // rediscovered as a fresh download next pass.
            Some(_) => Action::DropRecord,
        },
        (None, Some(_)) => match record.map(|r| r.state) {
            None => Action::Upload,
            // Remote copy of a synced file vanished: deleted elsewhere.
            Some(SyncState::Synced) => Action::LocalDelete,
            // The local copy is the only one left; send it up.
            Some(_) => Action::Upload,
        },
        (Some(cloud), Some(file)) => {
            if cloud.created > file.modified {
                return if cloud.available {
                    Action::Download
                } else {
                    Action::Keep
                };
            }
            if file.modified > cloud.created {
                return Action::Upload;
            }
            // Equal timestamps. A watcher-observed modification still wins
            // the tie; otherwise the views agree.
            match record.map(|r| r.state) {
                Some(SyncState::Modified) | Some(SyncState::UploadFailed) => Action::Upload,
                Some(SyncState::Synced) => Action::Keep,
                _ => Action::AdoptSynced,
            }
        }
    }
}

/// Groups the raw remote listing by logical name, keeping the entry with
/// the greatest embedded creation timestamp as current. Older entries are
/// historical versions, ignored here and swept by the cloud-delete task.
pub fn group_current(files: &[RenterFile], remote_root: &str) -> HashMap<String, CloudFile> {
    let mut current: HashMap<String, CloudFile> = HashMap::new();
    for file in files {
        let Some(cloud) = CloudFile::from_renter_file(file, remote_root) else {
            continue;
        };
        match current.get(&cloud.name) {
            Some(existing) if existing.created >= cloud.created => {}
            _ => {
                current.insert(cloud.name.clone(), cloud);
            }
        }
    }
    current
}

/// Walks the tracked directory into per-pass local projections, files only.
pub fn walk_local(sync_root: &Path) -> io::Result<HashMap<String, LocalFile>> {
    let mut out = HashMap::new();
    let mut stack = vec![sync_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }
            let Some(name) = name_for_local(sync_root, &path) else {
                continue;
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            out.insert(
                name.clone(),
                LocalFile {
                    name,
                    path,
                    size: meta.len(),
                    modified,
                },
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cloud(name: &str, created: i64) -> CloudFile {
        CloudFile {
            name: name.into(),
            cloud_path: format!("sync/{name}/{created}"),
            size: 10,
            created,
            available: true,
            upload_progress: 100.0,
        }
    }

    fn local(name: &str, modified: i64) -> LocalFile {
        LocalFile {
            name: name.into(),
            path: PathBuf::from(format!("/data/sync/{name}")),
            size: 10,
            modified,
        }
    }

    fn rec(name: &str, state: SyncState, cloud_created: Option<i64>) -> SyncRecord {
        let mut record = SyncRecord::new(name, state);
        record.cloud_path = cloud_created.map(|ts| format!("sync/{name}/{ts}"));
        record
    }

    #[test]
    fn remote_only_without_record_downloads() {
        assert_eq!(
            decide(Some(&cloud("a", 100)), None, None),
            Action::Download
        );
    }

    #[test]
    fn local_only_without_record_uploads() {
        assert_eq!(decide(None, Some(&local("a", 100)), None), Action::Upload);
    }

    #[test]
    fn strictly_newer_remote_wins() {
        let record = rec("a", SyncState::Synced, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 101)), Some(&local("a", 100)), Some(&record)),
            Action::Download
        );
    }

    #[test]
    fn newer_local_wins() {
        let record = rec("a", SyncState::Synced, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), Some(&local("a", 101)), Some(&record)),
            Action::Upload
        );
    }

    #[test]
    fn equal_timestamps_are_left_synced() {
        let record = rec("a", SyncState::Synced, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), Some(&local("a", 100)), Some(&record)),
            Action::Keep
        );
    }

    #[test]
    fn equal_timestamps_with_observed_modification_upload() {
        let record = rec("a", SyncState::Modified, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), Some(&local("a", 100)), Some(&record)),
            Action::Upload
        );
    }

    #[test]
    fn agreeing_views_without_record_adopt_synced() {
        assert_eq!(
            decide(Some(&cloud("a", 100)), Some(&local("a", 100)), None),
            Action::AdoptSynced
        );
    }

    #[test]
    fn transfer_owned_records_are_untouched() {
        for state in [
            SyncState::ForUpload,
            SyncState::Uploading,
            SyncState::ForDownload,
            SyncState::Downloading,
        ] {
            let record = rec("a", state, Some(200));
            assert_eq!(
                decide(Some(&cloud("a", 300)), Some(&local("a", 100)), Some(&record)),
                Action::Keep
            );
        }
    }

    #[test]
    fn modified_record_with_staged_download_waits_for_resolution() {
        let mut record = rec("a", SyncState::Modified, Some(100));
        record.temporary_path = Some("/staging/a.part".into());
        assert_eq!(
            decide(Some(&cloud("a", 100)), Some(&local("a", 200)), Some(&record)),
            Action::Keep
        );
    }

    #[test]
    fn unavailable_remote_is_not_fetched_yet() {
        let mut pending = cloud("a", 200);
        pending.available = false;
        assert_eq!(decide(Some(&pending), None, None), Action::Keep);
        assert_eq!(
            decide(Some(&pending), Some(&local("a", 100)), None),
            Action::Keep
        );
    }

    #[test]
    fn synced_record_with_missing_local_deletes_cloud() {
        let record = rec("a", SyncState::Synced, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), None, Some(&record)),
            Action::CloudDelete
        );
    }

    #[test]
    fn synced_record_with_missing_remote_deletes_local() {
        let record = rec("a", SyncState::Synced, Some(100));
        assert_eq!(
            decide(None, Some(&local("a", 100)), Some(&record)),
            Action::LocalDelete
        );
    }

    #[test]
    fn never_synced_record_with_vanished_local_is_dropped() {
        let record = rec("a", SyncState::Modified, None);
        assert_eq!(decide(None, None, Some(&record)), Action::DropRecord);
    }

    #[test]
    fn failed_download_is_retried_while_remote_exists() {
        let record = rec("a", SyncState::DownloadFailed, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), None, Some(&record)),
            Action::Download
        );
    }

    #[test]
    fn failed_upload_retries_while_local_newer() {
        let record = rec("a", SyncState::UploadFailed, Some(90));
        assert_eq!(
            decide(Some(&cloud("a", 90)), Some(&local("a", 100)), Some(&record)),
            Action::Upload
        );
    }

    #[test]
    fn deleted_record_with_remote_copy_deletes_cloud() {
        let record = rec("a", SyncState::Deleted, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), None, Some(&record)),
            Action::CloudDelete
        );
        assert_eq!(decide(None, None, Some(&record)), Action::DropRecord);
    }

    #[test]
    fn pending_deletes_are_reenqueued() {
        let record = rec("a", SyncState::ForCloudDelete, Some(100));
        assert_eq!(
            decide(Some(&cloud("a", 100)), None, Some(&record)),
            Action::CloudDelete
        );
        let record = rec("a", SyncState::ForLocalDelete, Some(100));
        assert_eq!(
            decide(None, Some(&local("a", 100)), Some(&record)),
            Action::LocalDelete
        );
    }

    #[test]
    fn grouping_keeps_greatest_embedded_timestamp() {
        let files = vec![
            RenterFile {
                siapath: "sync/a.txt/100".into(),
                available: true,
                filesize: 1,
                uploadprogress: 100.0,
            },
            RenterFile {
                siapath: "sync/a.txt/200".into(),
                available: true,
                filesize: 2,
                uploadprogress: 100.0,
            },
            RenterFile {
                siapath: "sync/b.txt/50".into(),
                available: false,
                filesize: 3,
                uploadprogress: 10.0,
            },
            RenterFile {
                siapath: "sync/no-timestamp".into(),
                available: true,
                filesize: 4,
                uploadprogress: 100.0,
            },
        ];

        let current = group_current(&files, "sync");

        assert_eq!(current.len(), 2);
        assert_eq!(current["a.txt"].created, 200);
        assert_eq!(current["a.txt"].size, 2);
        assert_eq!(current["b.txt"].created, 50);
    }

    #[test]
    fn walk_local_collects_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("top.bin"), b"x").unwrap();

        let found = walk_local(dir.path()).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["docs/a.txt"].size, 5);
        assert!(found["top.bin"].modified > 0);
    }

    #[test]
    fn walk_local_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(walk_local(&missing).unwrap().is_empty());
    }
}
