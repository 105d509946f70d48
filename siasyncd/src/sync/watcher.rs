use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::paths::name_for_local;

/// Raw filesystem change, already translated to a relative name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed { name: String },
    Removed { name: String },
}

pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<WatchEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for mapped in map_event(&watch_root, event) {
                let _ = tx.send(mapped);
            }
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            // A rename is a removal of the old name plus a change at the new.
            if event.paths.len() >= 2
                && let (Some(from), Some(to)) = (
                    name_for_local(root, &event.paths[0]),
                    name_for_local(root, &event.paths[1]),
                )
            {
                return vec![
                    WatchEvent::Removed { name: from },
                    WatchEvent::Changed { name: to },
                ];
            }
            Vec::new()
        }
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|path| !path.is_dir())
            .filter_map(|path| name_for_local(root, &path))
            .map(|name| WatchEvent::Changed { name })
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter_map(|path| name_for_local(root, &path))
            .map(|name| WatchEvent::Removed { name })
            .collect(),
        _ => Vec::new(),
    }
}

/// Debouncer for change events. Editors and copiers emit bursts of writes;
/// a path only graduates once it has been quiet for the configured window.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: HashMap<String, Instant>,
}

impl ChangeTracker {
    pub fn touch(&mut self, name: &str, at: Instant) {
        self.pending.insert(name.to_string(), at);
    }

    pub fn forget(&mut self, name: &str) {
        self.pending.remove(name);
    }

    /// Removes and returns every tracked name whose most recent event is at
    /// least `quiet_period` old.
    pub fn drain_quiet(&mut self, quiet_period: Duration, now: Instant) -> Vec<String> {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= quiet_period)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &ready {
            self.pending.remove(name);
        }
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn maps_data_modify_to_changed() {
        let root = Path::new("/data/sync");
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Any,
            )),
            paths: vec![PathBuf::from("/data/sync/docs/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(root, event),
            vec![WatchEvent::Changed {
                name: "docs/a.txt".into()
            }]
        );
    }

    #[test]
    fn maps_remove_to_removed() {
        let root = Path::new("/data/sync");
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/data/sync/docs/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(root, event),
            vec![WatchEvent::Removed {
                name: "docs/a.txt".into()
            }]
        );
    }

    #[test]
    fn maps_rename_to_removed_plus_changed() {
        let root = Path::new("/data/sync");
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Name(
                notify::event::RenameMode::Both,
            )),
            paths: vec![
                PathBuf::from("/data/sync/docs/a.txt"),
                PathBuf::from("/data/sync/docs/b.txt"),
            ],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(root, event),
            vec![
                WatchEvent::Removed {
                    name: "docs/a.txt".into()
                },
                WatchEvent::Changed {
                    name: "docs/b.txt".into()
                },
            ]
        );
    }

    #[test]
    fn ignores_paths_outside_root() {
        let root = Path::new("/data/sync");
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/elsewhere/a.txt")],
            attrs: Default::default(),
        };
        assert!(map_event(root, event).is_empty());
    }

    #[test]
    fn drain_respects_quiet_period() {
        let mut tracker = ChangeTracker::default();
        let start = Instant::now();
        let quiet = Duration::from_millis(1000);

        tracker.touch("a.txt", start);
        tracker.touch("b.txt", start + Duration::from_millis(800));

        let ready = tracker.drain_quiet(quiet, start + Duration::from_millis(1100));
        assert_eq!(ready, vec!["a.txt".to_string()]);

        let ready = tracker.drain_quiet(quiet, start + Duration::from_millis(1800));
        assert_eq!(ready, vec!["b.txt".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn repeated_touches_reset_the_clock() {
        let mut tracker = ChangeTracker::default();
        let start = Instant::now();
        let quiet = Duration::from_millis(1000);

        tracker.touch("a.txt", start);
        tracker.touch("a.txt", start + Duration::from_millis(900));

        assert!(
            tracker
                .drain_quiet(quiet, start + Duration::from_millis(1100))
                .is_empty()
        );
        assert_eq!(
            tracker.drain_quiet(quiet, start + Duration::from_millis(1900)),
            vec!["a.txt".to_string()]
        );
    }

    #[test]
    fn forget_drops_pending_entry() {
        let mut tracker = ChangeTracker::default();
        tracker.touch("a.txt", Instant::now());
        tracker.forget("a.txt");
        assert!(tracker.is_empty());
    }
}
