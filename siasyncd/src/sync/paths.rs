use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component")]
    UnsupportedComponent,
}

/// Appends the creation timestamp as the final path segment, producing the
/// remote object path used as a version marker.
pub fn with_creation_time(base: &str, created: i64) -> String {
    format!("{}/{created}", base.trim_end_matches('/'))
}

/// Parses the embedded creation timestamp from the final segment of a
/// remote path. Returns `None` for paths without one.
pub fn parse_creation_time(siapath: &str) -> Option<i64> {
    siapath
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok())
}

/// Recovers the logical relative name from a remote path: strips the remote
/// root prefix and the trailing timestamp segment.
pub fn logical_name(siapath: &str, remote_root: &str) -> Option<String> {
    let root = remote_root.trim_matches('/');
    let rest = siapath
        .trim_start_matches('/')
        .strip_prefix(root)?
        .strip_prefix('/')?;
    parse_creation_time(rest)?;
    let (name, _ts) = rest.trim_end_matches('/').rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

pub fn cloud_path_for(remote_root: &str, name: &str, created: i64) -> String {
    with_creation_time(&format!("{}/{name}", remote_root.trim_matches('/')), created)
}

/// Maps a relative name onto the tracked directory. Names are POSIX-like
/// regardless of host OS; traversal components are rejected.
pub fn local_path_for(sync_root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    let mut out = sync_root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}

/// Relative name for a file under the tracked directory, normalized to
/// forward slashes. Returns `None` for the root itself or paths outside it.
pub fn name_for_local(sync_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(sync_root).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative.to_string_lossy().replace('\\', "/"))
}

/// Private staging location for one in-flight download. Flat layout under
/// the staging root; the nonce keeps concurrent downloads of the same name
/// apart.
pub fn staging_path_for(staging_root: &Path, name: &str, nonce: u64) -> PathBuf {
    let flattened = name.replace('/', "_");
    staging_root.join(format!("{flattened}.{nonce:016x}.part"))
}

/// Sibling name for a conflict copy, e.g.
/// `report (conflicted copy alice 2026-08-29).txt`.
pub fn conflict_copy_name(name: &str, user: &str, date: &str) -> String {
    let (dir, file) = match name.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), name),
    };

    if let Some((stem, ext)) = file.rsplit_once('.')
        && !stem.is_empty()
    {
        return format!("{dir}{stem} (conflicted copy {user} {date}).{ext}");
    }

    format!("{dir}{file} (conflicted copy {user} {date})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_time_round_trips() {
        let path = with_creation_time("sync/docs/a.txt", 1_700_000_000);
        assert_eq!(path, "sync/docs/a.txt/1700000000");
        assert_eq!(parse_creation_time(&path), Some(1_700_000_000));
    }

    #[test]
    fn parse_creation_time_rejects_non_numeric_tail() {
        assert_eq!(parse_creation_time("sync/docs/a.txt"), None);
    }

    #[test]
    fn logical_name_strips_root_and_timestamp() {
        assert_eq!(
            logical_name("sync/docs/a.txt/1700000000", "sync").as_deref(),
            Some("docs/a.txt")
        );
        assert_eq!(logical_name("other/a.txt/1700000000", "sync"), None);
        assert_eq!(logical_name("sync/1700000000", "sync"), None);
    }

    #[test]
    fn cloud_path_embeds_name_and_timestamp() {
        assert_eq!(
            cloud_path_for("sync", "docs/a.txt", 17),
            "sync/docs/a.txt/17"
        );
    }

    #[test]
    fn local_path_maps_under_sync_root() {
        let root = PathBuf::from("/data/sync");
        assert_eq!(
            local_path_for(&root, "docs/a.txt").unwrap(),
            PathBuf::from("/data/sync/docs/a.txt")
        );
    }

    #[test]
    fn local_path_rejects_traversal() {
        let root = PathBuf::from("/data/sync");
        assert!(matches!(
            local_path_for(&root, "../escape"),
            Err(PathError::UnsupportedComponent)
        ));
    }

    #[test]
    fn name_for_local_is_relative_and_normalized() {
        let root = PathBuf::from("/data/sync");
        assert_eq!(
            name_for_local(&root, Path::new("/data/sync/docs/a.txt")).as_deref(),
            Some("docs/a.txt")
        );
        assert_eq!(name_for_local(&root, Path::new("/elsewhere/a.txt")), None);
        assert_eq!(name_for_local(&root, Path::new("/data/sync")), None);
    }

    #[test]
    fn conflict_copy_name_keeps_extension() {
        assert_eq!(
            conflict_copy_name("docs/report.txt", "alice", "2026-08-29"),
            "docs/report (conflicted copy alice 2026-08-29).txt"
        );
        assert_eq!(
            conflict_copy_name("LICENSE", "alice", "2026-08-29"),
            "LICENSE (conflicted copy alice 2026-08-29)"
        );
    }
}
